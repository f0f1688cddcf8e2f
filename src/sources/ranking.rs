use super::{NewsSource, SourceFetch};
use crate::browser::BrowserFetcher;
use crate::extract;
use crate::types::{Article, Language};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SOURCE_NAME: &str = "ranking-pages";

/// The ranked sections a portal exposes. `code` goes into the URL, `label`
/// into the article's section tag.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub code: &'static str,
    pub label: &'static str,
}

pub const SECTIONS: &[Section] = &[
    Section { code: "sisa", label: "시사" },
    Section { code: "spo", label: "스포츠" },
    Section { code: "ent", label: "연예" },
    Section { code: "pol", label: "정치" },
    Section { code: "eco", label: "경제" },
    Section { code: "soc", label: "사회" },
    Section { code: "int", label: "세계" },
    Section { code: "its", label: "IT과학" },
];

const MAX_PER_SECTION: usize = 5;

/// Most-viewed listings scraped from a news portal's ranking pages. These
/// listings are rendered markup rather than an API, so extraction goes
/// through the strategy cascade and the rendered-HTML fetcher.
pub struct RankingSource {
    browser: Arc<BrowserFetcher>,
    origin: String,
    sections: Vec<Section>,
}

impl RankingSource {
    pub fn new(browser: Arc<BrowserFetcher>, origin: impl Into<String>) -> Self {
        Self {
            browser,
            origin: origin.into(),
            sections: SECTIONS.to_vec(),
        }
    }

    fn section_url(&self, section: &Section, date: &str) -> String {
        format!(
            "{}/rank/interest?sc={}&p=day&date={}",
            self.origin.trim_end_matches('/'),
            section.code,
            date
        )
    }
}

#[async_trait]
impl NewsSource for RankingSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn keyword_driven(&self) -> bool {
        false
    }

    async fn fetch(&self, _keyword: &str) -> SourceFetch {
        let date = Utc::now().format("%Y%m%d").to_string();
        let mut articles = Vec::new();
        let mut failures = Vec::new();

        // Sections are fetched sequentially; the per-host rate limit makes
        // parallel requests to the same portal pointless.
        for section in &self.sections {
            let url = self.section_url(section, &date);
            let html = match self.browser.fetch_rendered(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(section = section.code, error = %e, "Ranking page fetch failed");
                    failures.push(format!("{}: {}", section.code, e));
                    continue;
                }
            };

            let items = extract::extract_items(&html, &self.origin, MAX_PER_SECTION);
            debug!(section = section.code, items = items.len(), "Ranking page extracted");

            for item in items {
                if let Some(article) = Article::new(
                    item.title,
                    String::new(),
                    SOURCE_NAME,
                    None,
                    item.link,
                    Language::Ko,
                    section.label,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_urls_carry_code_and_date() {
        let fetcher = Arc::new(crate::fetcher::Fetcher::new(Default::default()).unwrap());
        let browser = Arc::new(BrowserFetcher::new(fetcher, None));
        let source = RankingSource::new(browser, "https://news.nate.com/");
        let url = source.section_url(&SECTIONS[0], "20240115");
        assert_eq!(
            url,
            "https://news.nate.com/rank/interest?sc=sisa&p=day&date=20240115"
        );
    }

    #[test]
    fn all_eight_sections_present() {
        let codes: Vec<_> = SECTIONS.iter().map(|s| s.code).collect();
        assert_eq!(codes, ["sisa", "spo", "ent", "pol", "eco", "soc", "int", "its"]);
    }
}
