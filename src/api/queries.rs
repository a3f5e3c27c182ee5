//! GraphQL documents for the operations the client issues.

macro_rules! article_fields {
    () => {
        "fragment ArticleFields on Article { id title source publishedAt uri views description banner category }"
    };
}

macro_rules! article_with_links {
    () => {
        "fragment ArticleWithLinks on Article { linkedTo { ...ArticleFields } }"
    };
}

/// A named query together with the top-level response field holding its list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operation {
    pub name: &'static str,
    pub field: &'static str,
    pub document: &'static str,
}

pub(crate) const RECENT_ARTICLES: Operation = Operation {
    name: "GetRecentArticles",
    field: "recentArticle",
    document: concat!(
        "query GetRecentArticles($amount: Int!) { recentArticle(amount: $amount) { ...ArticleFields ...ArticleWithLinks } } ",
        article_fields!(),
        " ",
        article_with_links!()
    ),
};

pub(crate) const NEXT_RECENT_ARTICLES: Operation = Operation {
    name: "GetNextRecentArticles",
    field: "nextRecentArticle",
    document: concat!(
        "query GetNextRecentArticles($start: Int!, $stop: Int!) { nextRecentArticle(start: $start, stop: $stop) { ...ArticleFields ...ArticleWithLinks } } ",
        article_fields!(),
        " ",
        article_with_links!()
    ),
};

pub(crate) const KEYWORDS: Operation = Operation {
    name: "GetKeywords",
    field: "keywords",
    document: concat!(
        "query GetKeywords { keywords { id keyword lastUpdate articles { ...ArticleFields } } } ",
        article_fields!()
    ),
};

pub(crate) const BATCH_FIND_ARTICLES: Operation = Operation {
    name: "BatchFindArticles",
    field: "batchFindArticles",
    document: concat!(
        "query BatchFindArticles($ids: [ID!]!) { batchFindArticles(ids: $ids) { ...ArticleFields ...ArticleWithLinks } } ",
        article_fields!(),
        " ",
        article_with_links!()
    ),
};
