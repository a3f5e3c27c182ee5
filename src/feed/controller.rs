use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use super::search::is_active_query;
use super::state::{FeedError, FeedSnapshot, Phase};
use crate::api::{ApiError, ArticleSource};
use crate::article::{map_page, Article, MappedPage};
use crate::cancel::{FetchToken, Generation};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Tunables fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// Records requested per page. Values below 1 are raised to 1.
    pub page_size: usize,
    /// Quiet period before a search term takes effect.
    pub search_debounce: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            search_debounce: DEFAULT_SEARCH_DEBOUNCE,
        }
    }
}

// ============================================================================
// Internal State
// ============================================================================

struct FeedState {
    items: Arc<Vec<Article>>,
    /// Start index of the next page. Equals `items.len()` outside a fetch.
    offset: usize,
    has_more: bool,
    phase: Phase,
    error: Option<FeedError>,
    loading_more: bool,
    has_fetched_once: bool,
    raw_query: String,
    debounced_query: String,
    first_page_task: Option<AbortHandle>,
    more_task: Option<AbortHandle>,
    debounce_task: Option<AbortHandle>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            offset: 0,
            has_more: true,
            phase: Phase::Idle,
            error: None,
            loading_more: false,
            has_fetched_once: false,
            raw_query: String::new(),
            debounced_query: String::new(),
            first_page_task: None,
            more_task: None,
            debounce_task: None,
        }
    }

    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            items: Arc::clone(&self.items),
            phase: self.phase,
            error: self.error.clone(),
            has_more: self.has_more,
            loading_more: self.loading_more,
            raw_query: self.raw_query.clone(),
            debounced_query: self.debounced_query.clone(),
        }
    }
}

/// State shared between the controller handle and its fetch tasks.
///
/// Tasks only hold a `Weak` to this, so once the controller is gone their
/// completions have nothing to write to.
struct Shared {
    source: Arc<dyn ArticleSource>,
    options: FeedOptions,
    state: Mutex<FeedState>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    first_page_gen: Generation,
    more_gen: Generation,
    search_gen: Generation,
}

impl Shared {
    /// The lock is never held across an `.await`.
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &FeedState) {
        self.snapshot_tx.send_replace(state.snapshot());
    }

    /// Invalidate every in-flight fetch and enter `phase` for a new first page.
    fn begin_first_page(&self, state: &mut FeedState, phase: Phase) -> FetchToken {
        self.more_gen.cancel();
        for task in [state.first_page_task.take(), state.more_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }

        let token = self.first_page_gen.issue();
        state.phase = phase;
        state.error = None;
        state.offset = 0;
        state.has_more = true;
        state.loading_more = false;
        self.publish(state);

        tracing::debug!(generation = token.generation(), ?phase, "Fetching first page");
        token
    }

    fn apply_first_page(
        &self,
        token: &FetchToken,
        result: Result<MappedPage, ApiError>,
    ) -> Result<(), FeedError> {
        let mut state = self.lock();
        if token.is_cancelled() {
            tracing::debug!(
                generation = token.generation(),
                "Ignoring stale first page (generation mismatch)"
            );
            return Ok(());
        }
        state.first_page_task = None;

        let outcome = match result {
            Ok(page) => {
                let items = dedup_by_id(page.articles);
                state.offset = items.len();
                state.items = Arc::new(items);
                state.has_more = page.raw_count >= self.options.page_size;
                state.phase = Phase::Idle;
                state.error = None;
                state.has_fetched_once = true;
                tracing::info!(
                    items = state.items.len(),
                    has_more = state.has_more,
                    "Feed loaded"
                );
                Ok(())
            }
            Err(ApiError::Cancelled) => {
                tracing::debug!("Source cancelled first page on its own");
                state.offset = state.items.len();
                state.phase = Phase::Idle;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feed load failed");
                let err = FeedError::from(e);
                // Items from before the failed load stay visible.
                state.offset = state.items.len();
                state.phase = Phase::Error;
                state.error = Some(err.clone());
                Err(err)
            }
        };

        self.publish(&state);
        outcome
    }

    fn apply_next_page(&self, token: &FetchToken, start: usize, result: Result<MappedPage, ApiError>) {
        let mut state = self.lock();
        if token.is_cancelled() {
            tracing::debug!(
                generation = token.generation(),
                start,
                "Ignoring stale page (generation mismatch)"
            );
            return;
        }
        state.loading_more = false;
        state.more_task = None;

        match result {
            Ok(page) => {
                let appended = merge_page(Arc::make_mut(&mut state.items), page.articles);
                state.offset = state.items.len();
                state.has_more = page.raw_count >= self.options.page_size;
                tracing::info!(
                    start,
                    appended,
                    total = state.items.len(),
                    has_more = state.has_more,
                    "Next page loaded"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(start, "Source cancelled next page on its own");
            }
            Err(e) => {
                // Soft failure: the feed stays usable and the next call retries.
                tracing::warn!(error = %e, start, "Load more failed");
            }
        }

        self.publish(&state);
    }

    fn apply_debounced(&self, token: &FetchToken, query: String) {
        let mut state = self.lock();
        if token.is_cancelled() {
            return;
        }
        state.debounce_task = None;
        if state.debounced_query == query {
            return;
        }

        tracing::debug!(query = %query, "Search term settled");
        state.debounced_query = query;
        self.publish(&state);
    }

    fn fail_if_current(&self, token: &FetchToken, err: FeedError) {
        let mut state = self.lock();
        if token.is_cancelled() {
            return;
        }
        state.first_page_task = None;
        state.offset = state.items.len();
        state.phase = Phase::Error;
        state.error = Some(err);
        self.publish(&state);
    }
}

fn spawn_first_page(shared: &Arc<Shared>, token: FetchToken) -> JoinHandle<Result<(), FeedError>> {
    let weak = Arc::downgrade(shared);
    let source = Arc::clone(&shared.source);
    let page_size = shared.options.page_size;

    tokio::spawn(async move {
        let result = source
            .fetch_recent(page_size, &token)
            .await
            .map(|records| map_page(&records));
        match weak.upgrade() {
            Some(shared) => shared.apply_first_page(&token, result),
            None => Ok(()),
        }
    })
}

fn spawn_next_page(shared: &Arc<Shared>, token: FetchToken, start: usize) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let source = Arc::clone(&shared.source);
    let stop = start + shared.options.page_size;

    tokio::spawn(async move {
        let result = source
            .fetch_range(start, stop, &token)
            .await
            .map(|records| map_page(&records));
        if let Some(shared) = weak.upgrade() {
            shared.apply_next_page(&token, start, result);
        }
    })
}

/// Append `incoming` to `items`. An id already present is overwritten in
/// place (the server is the source of truth). Returns how many were appended.
fn merge_page(items: &mut Vec<Article>, incoming: Vec<Article>) -> usize {
    let mut index: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(pos, article)| (article.id.clone(), pos))
        .collect();

    let mut appended = 0;
    for article in incoming {
        match index.get(&article.id) {
            Some(&pos) => items[pos] = article,
            None => {
                index.insert(article.id.clone(), items.len());
                items.push(article);
                appended += 1;
            }
        }
    }
    appended
}

fn dedup_by_id(articles: Vec<Article>) -> Vec<Article> {
    let mut unique = Vec::with_capacity(articles.len());
    merge_page(&mut unique, articles);
    unique
}

// ============================================================================
// FeedController
// ============================================================================

/// Paginated, filterable article feed.
///
/// Owns the merged article list and the fetch state machine. Observers read
/// it through [`subscribe`](Self::subscribe) or [`snapshot`](Self::snapshot);
/// the action methods never block on the network.
///
/// Two fetch paths exist: the first page (`load_initial`/`refresh`) and
/// `load_more`. Entry guards on the phase and the `loading_more` flag keep at
/// most one fetch per path in flight. Each fetch carries a [`FetchToken`] and
/// its result is dropped if the token went stale in the meantime.
///
/// Must be used from within a Tokio runtime. Dropping the controller cancels
/// every in-flight fetch.
pub struct FeedController {
    shared: Arc<Shared>,
}

impl FeedController {
    pub fn new(source: Arc<dyn ArticleSource>, options: FeedOptions) -> Self {
        let options = FeedOptions {
            page_size: options.page_size.max(1),
            ..options
        };
        let state = FeedState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());

        Self {
            shared: Arc::new(Shared {
                source,
                options,
                state: Mutex::new(state),
                snapshot_tx,
                first_page_gen: Generation::new(),
                more_gen: Generation::new(),
                search_gen: Generation::new(),
            }),
        }
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn has_more(&self) -> bool {
        self.shared.lock().has_more
    }

    /// Every loaded article, unfiltered.
    pub fn items(&self) -> Arc<Vec<Article>> {
        Arc::clone(&self.shared.lock().items)
    }

    /// Failure detail; present only in [`Phase::Error`].
    pub fn error(&self) -> Option<FeedError> {
        self.shared.lock().error.clone()
    }

    /// Owned copy of the articles matching the debounced search term.
    pub fn visible_items(&self) -> Vec<Article> {
        self.snapshot().visible_items().into_iter().cloned().collect()
    }

    /// Fetch the first page unless the feed is already loaded or loading.
    ///
    /// Returns `true` if a fetch was issued. Does not wait for it.
    pub fn load_initial(&self) -> bool {
        let mut state = self.shared.lock();
        if state.has_fetched_once {
            tracing::debug!("Initial load skipped: feed already loaded");
            return false;
        }
        if state.phase.is_loading() {
            tracing::debug!(phase = ?state.phase, "Initial load skipped: already loading");
            return false;
        }

        let token = self.shared.begin_first_page(&mut state, Phase::LoadingInitial);
        let handle = spawn_first_page(&self.shared, token);
        state.first_page_task = Some(handle.abort_handle());
        true
    }

    /// Fetch the page after the last loaded item.
    ///
    /// No-op (returns `false`) while a first page is loading, in the error
    /// phase, when the feed is exhausted, when another load-more is running,
    /// or while a search term is active. Failures are logged, not surfaced.
    pub fn load_more(&self) -> bool {
        let mut state = self.shared.lock();
        if state.phase != Phase::Idle {
            tracing::debug!(phase = ?state.phase, "Load more skipped: feed not idle");
            return false;
        }
        if !state.has_more {
            tracing::debug!("Load more skipped: end of feed");
            return false;
        }
        if state.loading_more {
            tracing::debug!("Load more skipped: already loading");
            return false;
        }
        if is_active_query(&state.debounced_query) {
            tracing::debug!("Load more skipped: search active");
            return false;
        }

        let token = self.shared.more_gen.issue();
        let start = state.offset;
        state.loading_more = true;
        self.shared.publish(&state);

        tracing::debug!(generation = token.generation(), start, "Fetching next page");
        let handle = spawn_next_page(&self.shared, token, start);
        state.more_task = Some(handle.abort_handle());
        true
    }

    /// Refetch the first page, superseding every in-flight fetch, and wait
    /// for it.
    ///
    /// On failure the error phase is entered, previously loaded items are
    /// kept, and the error is returned. If this refresh is itself superseded
    /// (by another refresh or by shutdown) it returns `Ok(())` without
    /// applying anything.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        let (token, handle) = {
            let mut state = self.shared.lock();
            state.has_fetched_once = false;
            let token = self.shared.begin_first_page(&mut state, Phase::Refreshing);
            let handle = spawn_first_page(&self.shared, token.clone());
            state.first_page_task = Some(handle.abort_handle());
            (token, handle)
        };

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                tracing::debug!(generation = token.generation(), "Refresh superseded");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Refresh task panicked");
                let err = FeedError::Interrupted(e.to_string());
                self.shared.fail_if_current(&token, err.clone());
                Err(err)
            }
        }
    }

    /// Update the search text now; the filter picks it up after the quiet
    /// period unless another term arrives first.
    pub fn set_search_term(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.shared.lock();
        if let Some(task) = state.debounce_task.take() {
            task.abort();
        }
        let token = self.shared.search_gen.issue();
        state.raw_query.clone_from(&text);
        self.shared.publish(&state);

        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.options.search_debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.apply_debounced(&token, text);
            }
        });
        state.debounce_task = Some(handle.abort_handle());
    }

    /// Cancel every in-flight fetch and pending search update.
    ///
    /// Loading phases fall back to idle so nothing is left spinning. Also
    /// runs on drop.
    pub fn shutdown(&self) {
        self.shared.first_page_gen.cancel();
        self.shared.more_gen.cancel();
        self.shared.search_gen.cancel();

        let mut state = self.shared.lock();
        for task in [
            state.first_page_task.take(),
            state.more_task.take(),
            state.debounce_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        if state.phase.is_loading() {
            state.phase = Phase::Idle;
        }
        state.offset = state.items.len();
        state.loading_more = false;
        self.shared.publish(&state);
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
