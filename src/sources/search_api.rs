use super::{NewsSource, SourceFetch};
use crate::config::SearchApiConfig;
use crate::fetcher::Fetcher;
use crate::types::{Article, Language};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const SOURCE_NAME: &str = "search-api";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "pubDate", default)]
    pub_date: String,
}

/// Keyword search against an authenticated news search API. Items arrive
/// with markup fragments and entities embedded in titles, which are
/// stripped before the record enters the pipeline.
pub struct SearchApiSource {
    fetcher: Arc<Fetcher>,
    config: SearchApiConfig,
}

impl SearchApiSource {
    pub fn new(fetcher: Arc<Fetcher>, config: SearchApiConfig) -> Self {
        Self { fetcher, config }
    }

    fn request_url(&self, keyword: &str) -> crate::types::Result<String> {
        let mut url = Url::parse(&self.config.endpoint)?;
        url.query_pairs_mut()
            .append_pair("query", keyword)
            .append_pair("display", &self.config.page_size.to_string())
            .append_pair("sort", "date");
        Ok(url.into())
    }

    fn normalize(&self, item: SearchItem, keyword: &str) -> Option<Article> {
        let link = if item.originallink.is_empty() {
            item.link
        } else {
            item.originallink
        };

        let published_at = parse_rfc2822(&item.pub_date);
        let source_name = Url::parse(&link)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| SOURCE_NAME.to_string());

        Article::new(
            strip_markup(&item.title),
            strip_markup(&item.description),
            source_name,
            published_at,
            link,
            Language::Ko,
            keyword,
        )
    }
}

#[async_trait]
impl NewsSource for SearchApiSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, keyword: &str) -> SourceFetch {
        let url = match self.request_url(keyword) {
            Ok(url) => url,
            Err(e) => return SourceFetch::failed(SOURCE_NAME, e.to_string()),
        };

        let headers = [
            ("X-Naver-Client-Id", self.config.client_id.as_str()),
            ("X-Naver-Client-Secret", self.config.client_secret.as_str()),
        ];

        match self.fetcher.fetch_json::<SearchResponse>(&url, &headers).await {
            Ok(response) => {
                let total = response.items.len();
                let articles: Vec<Article> = response
                    .items
                    .into_iter()
                    .filter_map(|item| self.normalize(item, keyword))
                    .collect();
                debug!(keyword, received = total, kept = articles.len(), "Search API fetch");
                SourceFetch::ok(SOURCE_NAME, articles)
            }
            Err(e) => {
                warn!(keyword, error = %e, "Search API fetch failed");
                SourceFetch::failed(SOURCE_NAME, e.to_string())
            }
        }
    }
}

fn parse_rfc2822(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strip the `<b>` highlighting and common entities the API embeds in
/// titles and descriptions.
pub fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_stripping() {
        assert_eq!(strip_markup("<b>노인</b> 건강 &quot;특집&quot;"), "노인 건강 \"특집\"");
        assert_eq!(strip_markup("plain title"), "plain title");
        assert_eq!(strip_markup("a &amp; b"), "a & b");
    }

    #[test]
    fn rfc2822_dates_parse() {
        let parsed = parse_rfc2822("Mon, 15 Jan 2024 09:30:00 +0900").unwrap();
        assert_eq!(parsed.timezone(), Utc);
        assert!(parse_rfc2822("not a date").is_none());
    }
}
