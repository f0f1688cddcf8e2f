pub mod feed;
pub mod html;
pub mod ranking;
pub mod search_api;

use crate::types::Article;
use async_trait::async_trait;

pub use feed::FeedSource;
pub use html::HtmlSource;
pub use ranking::RankingSource;
pub use search_api::SearchApiSource;

/// Outcome of one adapter invocation. Adapters never fail the whole batch:
/// whatever was successfully normalized rides in `articles`, and `error`
/// records why the rest could not be produced.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: String,
    pub articles: Vec<Article>,
    pub error: Option<String>,
}

impl SourceFetch {
    pub fn ok(source: impl Into<String>, articles: Vec<Article>) -> Self {
        Self {
            source: source.into(),
            articles,
            error: None,
        }
    }

    pub fn partial(source: impl Into<String>, articles: Vec<Article>, error: String) -> Self {
        Self {
            source: source.into(),
            articles,
            error: Some(error),
        }
    }

    pub fn failed(source: impl Into<String>, error: String) -> Self {
        Self {
            source: source.into(),
            articles: Vec::new(),
            error: Some(error),
        }
    }
}

/// A normalized upstream of news articles. Implementations translate their
/// provider's shape (search API JSON, RSS, scraped rankings, raw HTML) into
/// `Article` values, dropping records that cannot satisfy the invariants.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Human-readable adapter name, used in logs and fetch reports.
    fn name(&self) -> &str;

    /// Whether this adapter produces different results per keyword. The
    /// aggregator invokes non-keyword-driven adapters once per batch
    /// instead of once per keyword.
    fn keyword_driven(&self) -> bool {
        true
    }

    /// Collect articles for a keyword. Keyword-insensitive adapters (the
    /// ranking pages) ignore it and tag output with their own section codes.
    async fn fetch(&self, keyword: &str) -> SourceFetch;
}
