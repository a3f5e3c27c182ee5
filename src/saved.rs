//! Saved articles: a persistent set of article ids and a loader that
//! resolves them to full articles.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::ArticleSource;
use crate::article::{map_page, Article};
use crate::cancel::FetchToken;
use crate::feed::FeedError;
use crate::loader::{LoadOutcome, LoadState, Loader};
use crate::storage::DatabaseError;

/// Persistent set of saved article ids.
#[async_trait]
pub trait SavedIdStore: Send + Sync {
    async fn contains(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Adding an id that is already saved is a no-op.
    async fn add(&self, id: &str) -> Result<(), DatabaseError>;

    async fn remove(&self, id: &str) -> Result<(), DatabaseError>;

    /// Every saved id, most recently saved first.
    async fn list(&self) -> Result<Vec<String>, DatabaseError>;

    async fn clear(&self) -> Result<(), DatabaseError>;

    /// Flip the saved state of `id`. Returns `true` if it is now saved.
    async fn toggle(&self, id: &str) -> Result<bool, DatabaseError> {
        if self.contains(id).await? {
            self.remove(id).await?;
            Ok(false)
        } else {
            self.add(id).await?;
            Ok(true)
        }
    }
}

pub type SavedState = LoadState<Vec<Article>>;

/// Resolves the saved ids to articles from the remote source.
pub struct SavedArticles {
    store: Arc<dyn SavedIdStore>,
    source: Arc<dyn ArticleSource>,
    loader: Loader<Vec<Article>>,
}

impl SavedArticles {
    pub fn new(store: Arc<dyn SavedIdStore>, source: Arc<dyn ArticleSource>) -> Self {
        Self {
            store,
            source,
            loader: Loader::new("saved", Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SavedIdStore> {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<SavedState> {
        self.loader.subscribe()
    }

    pub fn state(&self) -> SavedState {
        self.loader.state()
    }

    /// Start resolving the saved ids, cancelling any load still in flight.
    pub fn load(&self) {
        let (store, source) = (Arc::clone(&self.store), Arc::clone(&self.source));
        self.loader
            .spawn(move |token| resolve_saved(store, source, token));
    }

    /// Like [`load`](Self::load) but waits for the result.
    pub async fn reload(&self) -> Result<(), FeedError> {
        let (store, source) = (Arc::clone(&self.store), Arc::clone(&self.source));
        self.loader
            .run(move |token| resolve_saved(store, source, token))
            .await
    }

    pub fn shutdown(&self) {
        self.loader.shutdown();
    }
}

async fn resolve_saved(
    store: Arc<dyn SavedIdStore>,
    source: Arc<dyn ArticleSource>,
    token: FetchToken,
) -> LoadOutcome<Vec<Article>> {
    let ids = match store.list().await {
        Ok(ids) => ids,
        Err(e) => return LoadOutcome::Failed(FeedError::Storage(e.to_string())),
    };
    if token.is_cancelled() {
        return LoadOutcome::Cancelled;
    }
    if ids.is_empty() {
        return LoadOutcome::Ready(Vec::new());
    }

    let result = source.fetch_by_ids(&ids, &token).await.map(|records| {
        let articles = order_by_ids(map_page(&records).articles, &ids);
        if articles.len() < ids.len() {
            tracing::debug!(
                saved = ids.len(),
                found = articles.len(),
                "Some saved articles no longer exist"
            );
        }
        articles
    });
    LoadOutcome::from_api(result)
}

/// Sort `articles` into the order of `ids`. Articles whose id is not listed
/// go last, in their original order.
fn order_by_ids(mut articles: Vec<Article>, ids: &[String]) -> Vec<Article> {
    let rank: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.as_str(), pos))
        .collect();
    articles.sort_by_key(|article| rank.get(article.id.as_str()).copied().unwrap_or(usize::MAX));
    articles
}
