//! The paginated article feed.
//!
//! - [`FeedController`] owns the merged article list, the pagination offset
//!   and the fetch state machine, and publishes [`FeedSnapshot`]s over a
//!   `tokio::sync::watch` channel.
//! - [`filter_articles`] is the pure search filter applied to a snapshot's
//!   items with the debounced query.
//!
//! ```ignore
//! let feed = FeedController::new(source, FeedOptions::default());
//! let mut updates = feed.subscribe();
//!
//! feed.load_initial();
//! updates.wait_for(|s| !s.is_busy()).await?;
//! feed.load_more();
//! ```

mod controller;
mod search;
mod state;

pub use controller::{FeedController, FeedOptions, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_DEBOUNCE};
pub use search::{filter_articles, is_active_query};
pub use state::{FeedError, FeedSnapshot, Phase};
