//! Article model and the mapper from raw API records.
//!
//! The remote API hands back loosely-typed JSON records. This module turns
//! them into [`Article`] and [`Keyword`] values on a best-effort basis:
//!
//! - `null` entries are dropped, never defaulted
//! - a malformed record is dropped and counted; the rest of the batch survives
//! - an unparseable timestamp becomes "now" and is counted as a warning
//!
//! Batch functions return the survivors together with [`MapStats`] so callers
//! can log or surface how much was lost.

mod mapper;
mod types;

pub use mapper::{
    map_article, map_keywords, map_page, parse_timestamp, DateParseWarning, DecodeFailure,
    MapStats, MappedKeywords, MappedPage,
};
pub use types::{Article, Keyword};

#[cfg(test)]
pub(crate) use types::test_article;
