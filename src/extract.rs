use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// One candidate item pulled out of raw HTML before normalization into an
/// `Article`. Rank is the upstream's own ordering where it exposes one.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub rank: Option<u32>,
    pub title: String,
    pub link: String,
}

/// An extraction strategy is a pure function over the document. Strategies
/// are tried in priority order; the first one yielding at least one
/// plausible item wins, so a broken pattern degrades to the next one
/// instead of emptying the batch.
pub type Strategy = fn(&str) -> Vec<RawItem>;

pub fn strategies() -> &'static [(&'static str, Strategy)] {
    &[
        ("ranked-list", ranked_list_items),
        ("heading-anchor", heading_anchor_items),
        ("rank-span", rank_span_items),
        ("generic-anchor", generic_anchor_items),
    ]
}

/// Run the cascade against a document and normalize links against the
/// provider origin. Items that fail the plausibility predicate, or repeat
/// a title already seen in this invocation, are discarded.
pub fn extract_items(html: &str, origin: &str, max_items: usize) -> Vec<RawItem> {
    for (name, strategy) in strategies() {
        let mut seen_titles: HashSet<String> = HashSet::new();
        let mut items = Vec::new();

        for candidate in strategy(html) {
            if items.len() >= max_items {
                break;
            }
            if !plausible(&candidate.title) {
                continue;
            }
            let title_key = candidate.title.to_lowercase();
            if !seen_titles.insert(title_key) {
                continue;
            }
            items.push(RawItem {
                rank: candidate.rank.or(Some(items.len() as u32 + 1)),
                title: candidate.title,
                link: absolutize(origin, &candidate.link),
            });
        }

        if !items.is_empty() {
            debug!(strategy = name, count = items.len(), "Extraction strategy matched");
            return items;
        }
    }

    Vec::new()
}

const EXCLUSION_MARKERS: &[&str] = &["광고", "배너", "AD)", "sponsored", "banner"];
const MIN_TITLE_CHARS: usize = 5;

/// A title is plausible when it is long enough to be a headline and does
/// not carry ad/banner markers.
pub fn plausible(title: &str) -> bool {
    let trimmed = title.trim();
    if trimmed.chars().count() <= MIN_TITLE_CHARS {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !EXCLUSION_MARKERS
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Normalize a possibly-relative link to an absolute URL using the
/// provider's known origin.
pub fn absolutize(origin: &str, link: &str) -> String {
    let origin = origin.trim_end_matches('/');
    if link.starts_with("//") {
        format!("https:{}", link)
    } else if link.starts_with('/') {
        format!("{}{}", origin, link)
    } else if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("{}/{}", origin, link)
    }
}

fn ranked_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)<li class="r\d+">\s*<a[^>]*href="([^"]*)"[^>]*>.*?<span class="cnt">(\d+)</span>\s*<h2 class="context">([^<]+)</h2>"#,
        )
        .expect("ranked-list pattern")
    })
}

/// Structured ranking markup: `<li class="rN"><a href=..><span class="cnt">N</span><h2 class="context">title</h2>`.
fn ranked_list_items(html: &str) -> Vec<RawItem> {
    ranked_list_re()
        .captures_iter(html)
        .filter_map(|caps| {
            let rank = caps.get(2)?.as_str().parse().ok();
            Some(RawItem {
                rank,
                title: caps.get(3)?.as_str().trim().to_string(),
                link: caps.get(1)?.as_str().to_string(),
            })
        })
        .collect()
}

fn heading_anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*href="([^"]*)"[^>]*>\s*<h2[^>]*>([^<]+)</h2>"#)
            .expect("heading-anchor pattern")
    })
}

/// Anchors wrapping an `<h2>` headline.
fn heading_anchor_items(html: &str) -> Vec<RawItem> {
    heading_anchor_re()
        .captures_iter(html)
        .filter_map(|caps| {
            Some(RawItem {
                rank: None,
                title: caps.get(2)?.as_str().trim().to_string(),
                link: caps.get(1)?.as_str().to_string(),
            })
        })
        .collect()
}

fn rank_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)<span[^>]*class="[^"]*rank[^"]*"[^>]*>(\d+)</span>\s*<a[^>]*href="([^"]*)"[^>]*>([^<]+)</a>"#,
        )
        .expect("rank-span pattern")
    })
}

/// Explicit rank number in a span followed by the article anchor.
fn rank_span_items(html: &str) -> Vec<RawItem> {
    rank_span_re()
        .captures_iter(html)
        .filter_map(|caps| {
            Some(RawItem {
                rank: caps.get(1)?.as_str().parse().ok(),
                title: caps.get(3)?.as_str().trim().to_string(),
                link: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Last resort: every anchor with text, via a proper DOM parse.
fn generic_anchor_items(html: &str) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let link = element.value().attr("href")?.to_string();
            let title = element.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(RawItem {
                rank: None,
                title,
                link,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANKED_HTML: &str = r#"
        <ul>
        <li class="r1"><a href="/view/20240101n001"><span class="cnt">1</span><h2 class="context">시니어 건강 관리 팁 공개</h2></a></li>
        <li class="r2"><a href="//news.example.com/view/2"><span class="cnt">2</span><h2 class="context">노인 운동 프로그램 확대</h2></a></li>
        <li class="r3"><a href="/view/3"><span class="cnt">3</span><h2 class="context">광고 배너 안내</h2></a></li>
        </ul>
    "#;

    #[test]
    fn ranked_list_strategy_wins_and_filters_ads() {
        let items = extract_items(RANKED_HTML, "https://news.nate.com", 5);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].rank, Some(1));
        assert_eq!(items[0].title, "시니어 건강 관리 팁 공개");
        assert_eq!(items[0].link, "https://news.nate.com/view/20240101n001");
        assert_eq!(items[1].link, "https://news.example.com/view/2");
    }

    #[test]
    fn falls_through_to_anchor_strategy() {
        let html = r#"<div><a href="/a/1">충분히 긴 제목의 기사입니다</a></div>"#;
        let items = extract_items(html, "https://example.com", 5);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://example.com/a/1");
    }

    #[test]
    fn duplicate_titles_within_one_invocation_are_dropped() {
        let html = r#"
            <a href="/a/1">같은 제목의 기사 하나</a>
            <a href="/a/2">같은 제목의 기사 하나</a>
        "#;
        let items = extract_items(html, "https://example.com", 5);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn short_titles_are_implausible() {
        assert!(!plausible("짧다"));
        assert!(!plausible("  "));
        assert!(plausible("충분히 긴 뉴스 제목"));
    }

    #[test]
    fn link_absolutization() {
        assert_eq!(absolutize("https://x.com", "/a"), "https://x.com/a");
        assert_eq!(absolutize("https://x.com/", "//cdn.y.com/a"), "https://cdn.y.com/a");
        assert_eq!(absolutize("https://x.com", "https://y.com/a"), "https://y.com/a");
        assert_eq!(absolutize("https://x.com", "view/1"), "https://x.com/view/1");
    }
}
