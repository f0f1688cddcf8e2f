use super::{NewsSource, SourceFetch};
use crate::fetcher::Fetcher;
use crate::types::{Article, Language};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use url::form_urlencoded;

pub const SOURCE_NAME: &str = "news-feed";

/// Keyword search over a Google-News-style RSS endpoint. Entry titles carry
/// the publication name as a ` - Source` suffix, which is split off into
/// `source_name`.
pub struct FeedSource {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

impl FeedSource {
    pub fn new(fetcher: Arc<Fetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    fn request_url(&self, keyword: &str) -> String {
        let query: String = form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        format!(
            "{}/search?q={}&hl=ko&gl=KR&ceid=KR:ko",
            self.base_url.trim_end_matches('/'),
            query
        )
    }
}

#[async_trait]
impl NewsSource for FeedSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, keyword: &str) -> SourceFetch {
        let url = self.request_url(keyword);
        let body = match self.fetcher.fetch_text(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(keyword, error = %e, "Feed fetch failed");
                return SourceFetch::failed(SOURCE_NAME, e.to_string());
            }
        };

        let feed = match feed_rs::parser::parse(body.as_bytes()) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(keyword, error = %e, "Feed parse failed");
                return SourceFetch::failed(SOURCE_NAME, format!("feed parse: {}", e));
            }
        };

        let total = feed.entries.len();
        let articles: Vec<Article> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let raw_title = entry.title.map(|t| t.content).unwrap_or_default();
                let (title, source_name) = split_source_suffix(&raw_title);
                let link = entry.links.first().map(|l| l.href.clone())?;
                let body = entry
                    .summary
                    .map(|s| super::search_api::strip_markup(&s.content))
                    .unwrap_or_default();
                Article::new(
                    title,
                    body,
                    source_name,
                    entry.published.or(entry.updated),
                    link,
                    Language::Ko,
                    keyword,
                )
            })
            .collect();

        debug!(keyword, received = total, kept = articles.len(), "Feed fetch");
        SourceFetch::ok(SOURCE_NAME, articles)
    }
}

/// Split the trailing ` - Publication` suffix off a feed entry title. The
/// last occurrence wins, so hyphens inside the headline survive.
fn split_source_suffix(raw: &str) -> (String, String) {
    match raw.rsplit_once(" - ") {
        Some((title, source)) if !title.trim().is_empty() && !source.trim().is_empty() => {
            (title.trim().to_string(), source.trim().to_string())
        }
        _ => (raw.trim().to_string(), SOURCE_NAME.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_suffix_splitting() {
        let (title, source) = split_source_suffix("노인 건강 - 운동이 답이다 - 연합뉴스");
        assert_eq!(title, "노인 건강 - 운동이 답이다");
        assert_eq!(source, "연합뉴스");

        let (title, source) = split_source_suffix("접미사 없는 제목");
        assert_eq!(title, "접미사 없는 제목");
        assert_eq!(source, SOURCE_NAME);
    }

    #[test]
    fn request_url_encodes_keyword() {
        let fetcher = Arc::new(Fetcher::new(Default::default()).unwrap());
        let source = FeedSource::new(fetcher, "https://news.google.com/rss/");
        let url = source.request_url("노인 건강");
        assert!(url.starts_with("https://news.google.com/rss/search?q="));
        assert!(!url.contains(' '));
        assert!(url.ends_with("&hl=ko&gl=KR&ceid=KR:ko"));
    }
}
