//! Veritas news reader core.
//!
//! The heart of the crate is [`feed::FeedController`]: a paginated,
//! filterable article list fed by a remote [`api::ArticleSource`]. The
//! keyword list ([`keywords`]) and the saved-articles screen ([`saved`]) are
//! simpler one-shot loads over the same source.

pub mod api;
pub mod article;
pub mod cancel;
pub mod config;
pub mod feed;
pub mod keywords;
mod loader;
pub mod saved;
pub mod storage;
pub mod util;

pub use loader::LoadState;
