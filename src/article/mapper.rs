use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::types::{Article, Keyword};

/// Fixed wire format the API documents for timestamps (UTC offset, no fraction).
const STRICT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

// ============================================================================
// Error Types
// ============================================================================

/// A record that is present but cannot be decoded into an article or keyword.
///
/// Non-fatal: the record is dropped and the rest of the batch is kept.
#[derive(Debug, Error)]
#[error("Malformed record: {0}")]
pub struct DecodeFailure(#[from] serde_json::Error);

/// A timestamp that matched neither the strict format nor ISO-8601.
///
/// Non-fatal: the mapper substitutes the current time.
#[derive(Debug, Error)]
#[error("Could not parse date string '{raw}', using current time")]
pub struct DateParseWarning {
    pub raw: String,
}

// ============================================================================
// Wire Records
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleRecord {
    id: String,
    title: String,
    source: String,
    published_at: String,
    uri: String,
    views: u64,
    description: Option<String>,
    banner: Option<String>,
    #[serde(default)]
    category: Option<Vec<Option<String>>>,
    // Kept raw so one malformed linked entry doesn't sink its parent.
    #[serde(default)]
    linked_to: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordRecord {
    id: String,
    keyword: String,
    last_update: String,
    #[serde(default)]
    articles: Option<Vec<Value>>,
}

// ============================================================================
// Batch Results
// ============================================================================

/// Counters for records that were dropped or patched while mapping a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    /// `null` entries dropped.
    pub nulls: usize,
    /// Present-but-malformed entries dropped.
    pub decode_failures: usize,
    /// Timestamps replaced by the current time.
    pub date_warnings: usize,
}

impl MapStats {
    /// Total number of top-level or nested entries dropped.
    pub fn dropped(&self) -> usize {
        self.nulls + self.decode_failures
    }
}

/// Result of mapping one page of article records.
///
/// `raw_count` is the number of records the source returned, before any
/// were dropped. Pagination uses it for the full-page check.
#[derive(Debug)]
pub struct MappedPage {
    pub articles: Vec<Article>,
    pub raw_count: usize,
    pub stats: MapStats,
}

/// Result of mapping the keyword list.
#[derive(Debug)]
pub struct MappedKeywords {
    pub keywords: Vec<Keyword>,
    pub stats: MapStats,
}

// ============================================================================
// Mapping
// ============================================================================

/// Map one page of raw article records, keeping every record that decodes.
pub fn map_page(records: &[Value]) -> MappedPage {
    let mut stats = MapStats::default();
    let articles = records
        .iter()
        .filter_map(|record| map_article(record, &mut stats))
        .collect();

    if stats.dropped() > 0 || stats.date_warnings > 0 {
        tracing::warn!(
            total = records.len(),
            nulls = stats.nulls,
            malformed = stats.decode_failures,
            date_fallbacks = stats.date_warnings,
            "Article batch mapped with dropped or patched records"
        );
    }

    MappedPage {
        articles,
        raw_count: records.len(),
        stats,
    }
}

/// Map the keyword list. Each keyword's articles go through [`map_article`].
pub fn map_keywords(records: &[Value]) -> MappedKeywords {
    let mut stats = MapStats::default();
    let keywords = records
        .iter()
        .filter_map(|record| map_keyword(record, &mut stats))
        .collect();

    MappedKeywords { keywords, stats }
}

/// Map a single raw record to an [`Article`].
///
/// Returns `None` for `null` and for records that fail to decode; `stats`
/// records which of the two it was.
pub fn map_article(record: &Value, stats: &mut MapStats) -> Option<Article> {
    map_article_at_depth(record, stats, 0)
}

fn map_article_at_depth(record: &Value, stats: &mut MapStats, depth: usize) -> Option<Article> {
    let record: ArticleRecord = decode(record, stats)?;

    // Linked articles are only followed one level down.
    let linked_to = if depth == 0 {
        record
            .linked_to
            .unwrap_or_default()
            .iter()
            .filter_map(|linked| map_article_at_depth(linked, stats, depth + 1))
            .collect()
    } else {
        Vec::new()
    };

    Some(Article {
        published_at: parse_timestamp_counted(&record.published_at, stats),
        id: record.id,
        title: record.title,
        source: record.source,
        uri: record.uri,
        views: record.views,
        description: record.description.unwrap_or_default(),
        banner: record.banner.unwrap_or_default(),
        category: record
            .category
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect(),
        linked_to,
    })
}

fn map_keyword(record: &Value, stats: &mut MapStats) -> Option<Keyword> {
    let record: KeywordRecord = decode(record, stats)?;

    let articles = record
        .articles
        .unwrap_or_default()
        .iter()
        .filter_map(|article| map_article(article, stats))
        .collect();

    Some(Keyword {
        last_update: parse_timestamp_counted(&record.last_update, stats),
        id: record.id,
        keyword: record.keyword,
        articles,
    })
}

fn decode<T: serde::de::DeserializeOwned>(record: &Value, stats: &mut MapStats) -> Option<T> {
    if record.is_null() {
        stats.nulls += 1;
        return None;
    }

    match T::deserialize(record).map_err(DecodeFailure::from) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            stats.decode_failures += 1;
            let id = record.get("id").and_then(Value::as_str).unwrap_or("<missing>");
            tracing::warn!(error = %e, id, "Dropping malformed record");
            None
        }
    }
}

fn parse_timestamp_counted(raw: &str, stats: &mut MapStats) -> DateTime<Utc> {
    match parse_timestamp(raw) {
        Ok(ts) => ts,
        Err(warning) => {
            stats.date_warnings += 1;
            tracing::warn!(raw = %warning.raw, "{}", warning);
            Utc::now()
        }
    }
}

/// Parse an API timestamp.
///
/// Tries the strict `yyyy-MM-ddTHH:mm:ss±hhmm` format first, then generic
/// RFC 3339 / ISO-8601. Callers that must not fail fall back to the current
/// time on `Err`.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DateParseWarning> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_str(trimmed, STRICT_DATE_FORMAT) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(DateParseWarning {
        raw: raw.to_string(),
    })
}
