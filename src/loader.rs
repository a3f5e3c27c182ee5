//! One-shot background loads with their own loading/error state.
//!
//! Used by the secondary lists (keywords, saved articles) that have no
//! pagination: each load replaces the previous value wholesale, and starting
//! a load supersedes the one in flight.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::api::ApiError;
use crate::cancel::{FetchToken, Generation};
use crate::feed::FeedError;

/// Published state of a background load.
#[derive(Debug)]
pub struct LoadState<T> {
    pub value: Arc<T>,
    pub loading: bool,
    /// Failure of the most recent load. The previous value is kept.
    pub error: Option<FeedError>,
}

impl<T> Clone for LoadState<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<T: Default> Default for LoadState<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(T::default()),
            loading: false,
            error: None,
        }
    }
}

/// Result of one load job.
pub(crate) enum LoadOutcome<T> {
    Ready(T),
    Failed(FeedError),
    Cancelled,
}

impl<T> LoadOutcome<T> {
    pub(crate) fn from_api(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(value) => LoadOutcome::Ready(value),
            Err(e) if e.is_cancelled() => LoadOutcome::Cancelled,
            Err(e) => LoadOutcome::Failed(e.into()),
        }
    }
}

struct Inner<T> {
    name: &'static str,
    tx: watch::Sender<LoadState<T>>,
    generation: Generation,
    task: Mutex<Option<AbortHandle>>,
}

impl<T> Inner<T> {
    fn lock_task(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, token: &FetchToken, outcome: LoadOutcome<T>) -> Result<(), FeedError> {
        let mut task = self.lock_task();
        if token.is_cancelled() {
            tracing::debug!(loader = self.name, generation = token.generation(), "Ignoring stale load");
            return Ok(());
        }
        *task = None;

        let mut result = Ok(());
        self.tx.send_modify(|state| {
            state.loading = false;
            match outcome {
                LoadOutcome::Ready(value) => {
                    state.value = Arc::new(value);
                    state.error = None;
                }
                LoadOutcome::Failed(err) => {
                    tracing::warn!(loader = self.name, error = %err, "Load failed");
                    state.error = Some(err.clone());
                    result = Err(err);
                }
                LoadOutcome::Cancelled => {}
            }
        });
        result
    }
}

pub(crate) struct Loader<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Loader<T> {
    pub(crate) fn new(name: &'static str, initial: T) -> Self {
        let (tx, _) = watch::channel(LoadState {
            value: Arc::new(initial),
            loading: false,
            error: None,
        });
        Self {
            inner: Arc::new(Inner {
                name,
                tx,
                generation: Generation::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LoadState<T>> {
        self.inner.tx.subscribe()
    }

    pub(crate) fn state(&self) -> LoadState<T> {
        self.inner.tx.borrow().clone()
    }

    fn start<F, Fut>(&self, job: F) -> (FetchToken, JoinHandle<Result<(), FeedError>>)
    where
        F: FnOnce(FetchToken) -> Fut,
        Fut: Future<Output = LoadOutcome<T>> + Send + 'static,
    {
        let mut task = self.inner.lock_task();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let token = self.inner.generation.issue();
        self.inner.tx.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        tracing::debug!(loader = self.inner.name, generation = token.generation(), "Load started");

        let job = job(token.clone());
        let weak = Arc::downgrade(&self.inner);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = job.await;
            match weak.upgrade() {
                Some(inner) => inner.finish(&task_token, outcome),
                None => Ok(()),
            }
        });
        *task = Some(handle.abort_handle());
        (token, handle)
    }

    /// Start a load without waiting for it.
    pub(crate) fn spawn<F, Fut>(&self, job: F)
    where
        F: FnOnce(FetchToken) -> Fut,
        Fut: Future<Output = LoadOutcome<T>> + Send + 'static,
    {
        let _ = self.start(job);
    }

    /// Start a load and wait for it. A superseded load returns `Ok(())`.
    pub(crate) async fn run<F, Fut>(&self, job: F) -> Result<(), FeedError>
    where
        F: FnOnce(FetchToken) -> Fut,
        Fut: Future<Output = LoadOutcome<T>> + Send + 'static,
    {
        let (token, handle) = self.start(job);
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                tracing::error!(loader = self.inner.name, error = %e, "Load task panicked");
                let err = FeedError::Interrupted(e.to_string());
                self.inner.finish(&token, LoadOutcome::Failed(err))
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        self.inner.generation.cancel();
        if let Some(task) = self.inner.lock_task().take() {
            task.abort();
        }
        self.inner.tx.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
    }
}

impl<T> Drop for Loader<T> {
    fn drop(&mut self) {
        self.inner.generation.cancel();
        if let Some(task) = self.inner.lock_task().take() {
            task.abort();
        }
    }
}
