use chrono::{DateTime, Utc};
use serde::Serialize;
use std::hash::{Hash, Hasher};

// ============================================================================
// Article
// ============================================================================

/// A news article as served by the remote feed.
///
/// Identity is the `id` alone: two values with the same `id` compare equal
/// and hash identically even when every other field differs. The server is
/// treated as the source of truth, so a later fetch of the same `id` simply
/// overwrites what was held before. There is no conflict detection.
///
/// `linked_to` is one level deep: articles inside it always carry an empty
/// `linked_to` of their own.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    /// Outlet name, e.g. "Tagesschau" or "FAZ".
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub uri: String,
    pub views: u64,
    pub description: String,
    /// Banner image URL. May be empty.
    pub banner: String,
    pub category: Vec<String>,
    pub linked_to: Vec<Article>,
}

impl PartialEq for Article {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Article {}

impl Hash for Article {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// Keyword
// ============================================================================

/// A trending topic keyword with the articles clustered under it.
///
/// Same identity rule as [`Article`]: equality by `id` only.
#[derive(Debug, Clone, Serialize)]
pub struct Keyword {
    pub id: String,
    pub keyword: String,
    pub last_update: DateTime<Utc>,
    pub articles: Vec<Article>,
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Keyword {}

impl Hash for Keyword {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
pub(crate) fn test_article(id: &str, title: &str) -> Article {
    Article {
        id: id.to_string(),
        title: title.to_string(),
        source: "Tagesschau".to_string(),
        published_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        uri: format!("https://example.com/{id}"),
        views: 0,
        description: String::new(),
        banner: String::new(),
        category: Vec::new(),
        linked_to: Vec::new(),
    }
}
