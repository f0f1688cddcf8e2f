use super::{NewsSource, SourceFetch};
use crate::extract;
use crate::fetcher::Fetcher;
use crate::types::{Article, Language};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const SOURCE_NAME: &str = "html-pages";

const MAX_PER_PAGE: usize = 5;

/// Catch-all adapter for arbitrary listing pages without a feed or API.
/// Each configured page goes through the same extraction cascade as the
/// ranking pages; links are absolutized against the page's own origin.
pub struct HtmlSource {
    fetcher: Arc<Fetcher>,
    pages: Vec<String>,
}

impl HtmlSource {
    pub fn new(fetcher: Arc<Fetcher>, pages: Vec<String>) -> Self {
        Self { fetcher, pages }
    }
}

#[async_trait]
impl NewsSource for HtmlSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, keyword: &str) -> SourceFetch {
        let mut articles = Vec::new();
        let mut failures = Vec::new();

        for page in &self.pages {
            let origin = match Url::parse(page) {
                Ok(url) => format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
                Err(e) => {
                    failures.push(format!("{}: {}", page, e));
                    continue;
                }
            };

            let html = match self.fetcher.fetch_text_decoded(page).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(page, error = %e, "HTML page fetch failed");
                    failures.push(format!("{}: {}", page, e));
                    continue;
                }
            };

            let items = extract::extract_items(&html, &origin, MAX_PER_PAGE);
            debug!(page, items = items.len(), "HTML page extracted");

            for item in items {
                let source_name = Url::parse(&item.link)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| SOURCE_NAME.to_string());
                if let Some(article) = Article::new(
                    item.title,
                    String::new(),
                    source_name,
                    None,
                    item.link,
                    Language::Unknown,
                    keyword,
                ) {
                    articles.push(article);
                }
            }
        }

        if failures.is_empty() {
            SourceFetch::ok(SOURCE_NAME, articles)
        } else {
            SourceFetch::partial(SOURCE_NAME, articles, failures.join("; "))
        }
    }
}
