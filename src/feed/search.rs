//! Text filter over already-fetched articles.

use crate::article::Article;

/// True if `article` matches `needle`, which must already be lowercased.
///
/// Case-insensitive substring match, OR across title, description, source,
/// and every category tag.
fn matches_lowercased(article: &Article, needle: &str) -> bool {
    article.title.to_lowercase().contains(needle)
        || article.description.to_lowercase().contains(needle)
        || article.source.to_lowercase().contains(needle)
        || article
            .category
            .iter()
            .any(|tag| tag.to_lowercase().contains(needle))
}

/// Articles from `items` matching `query`, in their original order.
///
/// The query is trimmed first; a blank query returns every item.
pub fn filter_articles<'a>(items: &'a [Article], query: &str) -> Vec<&'a Article> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return items.iter().collect();
    }

    items
        .iter()
        .filter(|article| matches_lowercased(article, &needle))
        .collect()
}

/// True if `query` would actually narrow the list.
pub fn is_active_query(query: &str) -> bool {
    !query.trim().is_empty()
}
