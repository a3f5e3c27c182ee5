//! Topic keywords, each carrying its own list of articles.

use std::sync::Arc;
use tokio::sync::watch;

use crate::api::ArticleSource;
use crate::article::{map_keywords, Keyword};
use crate::cancel::FetchToken;
use crate::feed::FeedError;
use crate::loader::{LoadOutcome, LoadState, Loader};

pub type KeywordsState = LoadState<Vec<Keyword>>;

/// Loads the keyword list. No pagination; every load replaces the list.
pub struct KeywordsController {
    source: Arc<dyn ArticleSource>,
    loader: Loader<Vec<Keyword>>,
}

impl KeywordsController {
    pub fn new(source: Arc<dyn ArticleSource>) -> Self {
        Self {
            source,
            loader: Loader::new("keywords", Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<KeywordsState> {
        self.loader.subscribe()
    }

    pub fn state(&self) -> KeywordsState {
        self.loader.state()
    }

    /// Start loading, cancelling any load still in flight.
    pub fn load(&self) {
        let source = Arc::clone(&self.source);
        self.loader.spawn(move |token| fetch_keywords(source, token));
    }

    /// Like [`load`](Self::load) but waits for the result.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        let source = Arc::clone(&self.source);
        self.loader
            .run(move |token| fetch_keywords(source, token))
            .await
    }

    pub fn shutdown(&self) {
        self.loader.shutdown();
    }
}

async fn fetch_keywords(source: Arc<dyn ArticleSource>, token: FetchToken) -> LoadOutcome<Vec<Keyword>> {
    let result = source.fetch_keywords(&token).await.map(|records| {
        let mapped = map_keywords(&records);
        tracing::info!(
            keywords = mapped.keywords.len(),
            dropped = mapped.stats.dropped(),
            "Keywords loaded"
        );
        mapped.keywords
    });
    LoadOutcome::from_api(result)
}
