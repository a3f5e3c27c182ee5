use std::sync::Arc;
use thiserror::Error;

use super::search::{filter_articles, is_active_query};
use crate::api::ApiError;
use crate::article::Article;

// ============================================================================
// Error Types
// ============================================================================

/// User-visible failure of a feed operation.
///
/// Cancellation never becomes a `FeedError`: superseded operations finish
/// silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The remote source failed (transport, HTTP, GraphQL, decoding)
    #[error("Could not load articles: {0}")]
    Network(String),
    /// The saved-articles store could not be read
    #[error("Could not read saved articles: {0}")]
    Storage(String),
    /// A background fetch task panicked
    #[error("Feed task stopped unexpectedly: {0}")]
    Interrupted(String),
}

impl From<ApiError> for FeedError {
    fn from(err: ApiError) -> Self {
        FeedError::Network(err.to_string())
    }
}

// ============================================================================
// Phase
// ============================================================================

/// Coarse state-machine position of the feed.
///
/// Load-more is tracked separately (`FeedSnapshot::loading_more`) because it
/// may overlap with an initial load or refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    LoadingInitial,
    Refreshing,
    Error,
}

impl Phase {
    pub fn is_loading(self) -> bool {
        matches!(self, Phase::LoadingInitial | Phase::Refreshing)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable view of the feed published to observers.
///
/// `items` is shared with the controller (`Arc`), so cloning a snapshot is
/// O(1). The filtered list is derived on every call to
/// [`visible_items`](Self::visible_items) and is never cached.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub items: Arc<Vec<Article>>,
    pub phase: Phase,
    /// Present iff `phase == Phase::Error`.
    pub error: Option<FeedError>,
    pub has_more: bool,
    pub loading_more: bool,
    /// Search text as typed.
    pub raw_query: String,
    /// Search text after the quiet period; the only one used for filtering.
    pub debounced_query: String,
}

impl FeedSnapshot {
    /// Items matching the debounced query.
    pub fn visible_items(&self) -> Vec<&Article> {
        filter_articles(&self.items, &self.debounced_query)
    }

    pub fn is_searching(&self) -> bool {
        is_active_query(&self.debounced_query)
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_loading() || self.loading_more
    }
}
