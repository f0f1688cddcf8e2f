use crate::generate::{parse_json_reply, ProviderSet};
use crate::types::{Article, ScoredArticle};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const TITLE_KEYWORD_BONUS: i64 = 50;
const BODY_OCCURRENCE_BONUS: i64 = 10;
const RECENCY_WEEK_BONUS: i64 = 20;
const RECENCY_FORTNIGHT_BONUS: i64 = 10;
const TRUSTED_SOURCE_BONUS: i64 = 15;
const BODY_LENGTH_BONUS: i64 = 10;
const BODY_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 500..=2000;

/// Deduplication and relevance ranking. Scoring is fully deterministic:
/// the same articles, keywords, and clock always produce the same order.
pub struct Ranker {
    trusted_sources: Vec<String>,
    top_n: usize,
}

/// Survivors, ranked, plus the duplicates that were folded into them.
/// Each duplicate keeps a back-reference to its survivor's id for audit.
#[derive(Debug, Default)]
pub struct RankOutcome {
    pub ranked: Vec<ScoredArticle>,
    pub duplicates: Vec<ScoredArticle>,
}

impl Ranker {
    pub fn new(trusted_sources: Vec<String>, top_n: usize) -> Self {
        Self {
            trusted_sources,
            top_n,
        }
    }

    /// Deduplicate, score, and keep the top N per keyword group. Running
    /// the output back through changes nothing: survivors have distinct
    /// ids and normalized titles by construction.
    pub fn rank(&self, articles: Vec<Article>, keywords: &[String]) -> RankOutcome {
        let now = Utc::now();
        self.rank_at(articles, keywords, now)
    }

    pub fn rank_at(
        &self,
        articles: Vec<Article>,
        keywords: &[String],
        now: DateTime<Utc>,
    ) -> RankOutcome {
        let total = articles.len();
        let mut survivors: Vec<Article> = Vec::new();
        let mut seen_ids: HashMap<String, usize> = HashMap::new();
        let mut seen_titles: HashMap<String, usize> = HashMap::new();
        let mut duplicates: Vec<(Article, String)> = Vec::new();

        for article in articles {
            let title_key = normalize_title(&article.title);
            let survivor_index = seen_ids
                .get(&article.id)
                .or_else(|| seen_titles.get(&title_key))
                .copied();

            match survivor_index {
                Some(index) => {
                    // The most complete body wins the slot; the displaced
                    // article is recorded as the duplicate either way.
                    if article.body.chars().count() > survivors[index].body.chars().count() {
                        let displaced = std::mem::replace(&mut survivors[index], article);
                        seen_ids.insert(survivors[index].id.clone(), index);
                        // The winner's title must keep matching this slot,
                        // or a later repeat of it would slip through.
                        seen_titles.insert(title_key, index);
                        duplicates.push((displaced, survivors[index].id.clone()));
                    } else {
                        duplicates.push((article, survivors[index].id.clone()));
                    }
                }
                None => {
                    let index = survivors.len();
                    seen_ids.insert(article.id.clone(), index);
                    seen_titles.insert(title_key, index);
                    survivors.push(article);
                }
            }
        }

        let mut scored: Vec<ScoredArticle> = survivors
            .into_iter()
            .map(|article| {
                let relevance_score = self.score(&article, keywords, now);
                ScoredArticle {
                    article,
                    relevance_score,
                    duplicate_of: None,
                }
            })
            .collect();

        // Group by the keyword/section that produced the article, keep the
        // top N of each group, then merge back into one descending list.
        let mut groups: HashMap<String, Vec<ScoredArticle>> = HashMap::new();
        for entry in scored.drain(..) {
            groups
                .entry(entry.article.section_or_keyword.clone())
                .or_default()
                .push(entry);
        }

        let mut ranked = Vec::new();
        for (_, mut group) in groups {
            self.sort(&mut group);
            group.truncate(self.top_n);
            ranked.extend(group);
        }
        self.sort(&mut ranked);

        debug!(
            total,
            ranked = ranked.len(),
            duplicates = duplicates.len(),
            "Ranking pass complete"
        );

        RankOutcome {
            ranked,
            duplicates: duplicates
                .into_iter()
                .map(|(article, survivor_id)| {
                    let relevance_score = self.score(&article, keywords, now);
                    ScoredArticle {
                        article,
                        relevance_score,
                        duplicate_of: Some(survivor_id),
                    }
                })
                .collect(),
        }
    }

    /// Additive scoring over keyword, recency, trust, and body-length
    /// signals. Adding a matching signal never lowers a score.
    pub fn score(&self, article: &Article, keywords: &[String], now: DateTime<Utc>) -> i64 {
        let mut score = 0i64;
        let title = article.title.to_lowercase();
        let body = article.body.to_lowercase();

        for keyword in keywords {
            let keyword = keyword.to_lowercase();
            if keyword.is_empty() {
                continue;
            }
            if title.contains(&keyword) {
                score += TITLE_KEYWORD_BONUS;
            }
            score += body.matches(&keyword).count() as i64 * BODY_OCCURRENCE_BONUS;
        }

        let age = now.signed_duration_since(article.published_at);
        if age <= Duration::days(7) {
            score += RECENCY_WEEK_BONUS;
        } else if age <= Duration::days(14) {
            score += RECENCY_FORTNIGHT_BONUS;
        }

        if self.is_trusted(&article.source_name) {
            score += TRUSTED_SOURCE_BONUS;
        }

        if BODY_LENGTH_RANGE.contains(&article.body.chars().count()) {
            score += BODY_LENGTH_BONUS;
        }

        score
    }

    fn is_trusted(&self, source_name: &str) -> bool {
        self.trusted_sources
            .iter()
            .any(|trusted| source_name.contains(trusted.as_str()))
    }

    /// Descending score; ties broken by recency, then by source trust.
    fn sort(&self, entries: &mut [ScoredArticle]) {
        entries.sort_by(|a, b| {
            b.relevance_score
                .cmp(&a.relevance_score)
                .then_with(|| b.article.published_at.cmp(&a.article.published_at))
                .then_with(|| {
                    self.is_trusted(&b.article.source_name)
                        .cmp(&self.is_trusted(&a.article.source_name))
                })
        });
    }
}

#[derive(Debug, Deserialize)]
struct SimilarGroups {
    #[serde(default)]
    groups: Vec<SimilarGroup>,
}

#[derive(Debug, Deserialize)]
struct SimilarGroup {
    keep: String,
    #[serde(default)]
    drop: Vec<String>,
}

/// Near-duplicate detection through a generative provider, layered on top
/// of the exact pass. Strictly fail-open: no provider, a provider error,
/// an unparseable reply, or ids that don't belong to the batch all leave
/// the batch untouched. Correctness never depends on this pass.
pub struct SimilarityJudge {
    providers: Arc<ProviderSet>,
}

impl SimilarityJudge {
    pub fn new(providers: Arc<ProviderSet>) -> Self {
        Self { providers }
    }

    /// Fold near-duplicates into their survivors. Returns the kept
    /// articles and the folded ones, the latter with `duplicate_of` set.
    pub async fn fold(
        &self,
        ranked: Vec<ScoredArticle>,
    ) -> (Vec<ScoredArticle>, Vec<ScoredArticle>) {
        if self.providers.is_empty() || ranked.len() < 2 {
            return (ranked, Vec::new());
        }

        let raw = match self.providers.generate(&similarity_prompt(&ranked)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Similarity pass unavailable, keeping batch as-is");
                return (ranked, Vec::new());
            }
        };

        let Some(reply) = parse_json_reply::<SimilarGroups>(&raw) else {
            warn!("Unparseable similarity reply, keeping batch as-is");
            return (ranked, Vec::new());
        };

        let ids: HashSet<&str> = ranked.iter().map(|s| s.article.id.as_str()).collect();
        let mut fold_into: HashMap<String, String> = HashMap::new();
        for group in reply.groups {
            if !ids.contains(group.keep.as_str()) {
                continue;
            }
            for dropped in group.drop {
                if dropped != group.keep
                    && ids.contains(dropped.as_str())
                    && !fold_into.contains_key(&group.keep)
                {
                    fold_into.insert(dropped, group.keep.clone());
                }
            }
        }

        let mut kept = Vec::new();
        let mut folded = Vec::new();
        for mut scored in ranked {
            match fold_into.get(&scored.article.id) {
                Some(survivor) => {
                    scored.duplicate_of = Some(survivor.clone());
                    folded.push(scored);
                }
                None => kept.push(scored),
            }
        }

        if !folded.is_empty() {
            debug!(folded = folded.len(), "Similarity pass folded near-duplicates");
        }
        (kept, folded)
    }
}

fn similarity_prompt(ranked: &[ScoredArticle]) -> String {
    let listing = ranked
        .iter()
        .map(|s| format!("- id: {}\n  제목: {}", s.article.id, s.article.title))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "다음 기사 목록에서 같은 사건을 다루는 기사 그룹을 찾아 주세요.\n\
         각 그룹에서 가장 대표적인 기사 하나만 남깁니다.\n\n{listing}\n\n\
         아래 JSON 형식으로만 답하세요. 중복이 없으면 빈 배열을 반환하세요.\n\
         {{\"groups\": [{{\"keep\": \"<id>\", \"drop\": [\"<id>\"]}}]}}"
    )
}

/// Collapse a title to its comparable core: lowercase, alphanumeric only
/// (Hangul counts), whitespace removed. Two titles with the same core are
/// the same story.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}
