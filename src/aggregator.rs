use crate::sources::{NewsSource, SourceFetch};
use crate::types::Article;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Per-source outcome for one aggregation pass, surfaced in run reports
/// and the CLI.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub fetched: usize,
    pub error: Option<String>,
}

/// Everything one aggregation pass produced. `articles` may be non-empty
/// even when some outcomes carry errors; a pass only comes back empty when
/// every source failed.
#[derive(Debug, Clone, Default)]
pub struct AggregateResult {
    pub articles: Vec<Article>,
    pub outcomes: Vec<SourceOutcome>,
}

impl AggregateResult {
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.error.is_some())
    }
}

/// Fans a keyword batch out across all configured sources concurrently,
/// holding each invocation to the search budget. A slow or failing source
/// costs its own slice of the batch, never the whole pass.
pub struct Aggregator {
    sources: Vec<Arc<dyn NewsSource>>,
    budget: Duration,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn NewsSource>>, budget: Duration) -> Self {
        Self { sources, budget }
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    pub async fn collect(&self, keywords: &[String]) -> AggregateResult {
        // No (keyword, source) pair is invoked twice in one pass, even
        // when the keyword list repeats itself.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut invocations: Vec<(Arc<dyn NewsSource>, String)> = Vec::new();
        for source in &self.sources {
            if source.keyword_driven() {
                for keyword in keywords {
                    if seen.insert((source.name().to_string(), keyword.clone())) {
                        invocations.push((Arc::clone(source), keyword.clone()));
                    }
                }
            } else if let Some(first) = keywords.first() {
                invocations.push((Arc::clone(source), first.clone()));
            }
        }

        let futures = invocations.into_iter().map(|(source, keyword)| {
            let budget = self.budget;
            async move {
                match timeout(budget, source.fetch(&keyword)).await {
                    Ok(fetch) => fetch,
                    Err(_) => {
                        warn!(
                            source = source.name(),
                            keyword,
                            budget_ms = budget.as_millis() as u64,
                            "Source exceeded the search budget"
                        );
                        SourceFetch::failed(
                            source.name(),
                            format!("budget of {}ms exceeded", budget.as_millis()),
                        )
                    }
                }
            }
        });

        let mut result = AggregateResult::default();
        for fetch in join_all(futures).await {
            result.outcomes.push(SourceOutcome {
                source: fetch.source.clone(),
                fetched: fetch.articles.len(),
                error: fetch.error,
            });
            result.articles.extend(fetch.articles);
        }

        info!(
            keywords = keywords.len(),
            articles = result.articles.len(),
            sources = result.outcomes.len(),
            "Aggregation pass complete"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Article, Language};
    use async_trait::async_trait;

    struct StaticSource {
        name: &'static str,
        titles: Vec<&'static str>,
    }

    #[async_trait]
    impl NewsSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, keyword: &str) -> SourceFetch {
            let articles = self
                .titles
                .iter()
                .filter_map(|title| {
                    Article::new(
                        *title,
                        "",
                        self.name,
                        None,
                        format!("https://{}.example.com/{}", self.name, title.len()),
                        Language::Ko,
                        keyword,
                    )
                })
                .collect();
            SourceFetch::ok(self.name, articles)
        }
    }

    struct SlowSource;

    #[async_trait]
    impl NewsSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _keyword: &str) -> SourceFetch {
            tokio::time::sleep(Duration::from_secs(60)).await;
            SourceFetch::ok("slow", Vec::new())
        }
    }

    #[tokio::test]
    async fn partial_results_survive_a_slow_source() {
        let aggregator = Aggregator::new(
            vec![
                Arc::new(StaticSource {
                    name: "fast",
                    titles: vec!["충분히 긴 기사 제목"],
                }),
                Arc::new(SlowSource),
            ],
            Duration::from_millis(50),
        );

        let result = aggregator.collect(&["노인 건강".to_string()]).await;
        assert_eq!(result.articles.len(), 1);
        assert_eq!(result.outcomes.len(), 2);
        let slow = result.outcomes.iter().find(|o| o.source == "slow").unwrap();
        assert!(slow.error.as_deref().unwrap_or("").contains("budget"));
        assert!(!result.all_failed());
    }

    #[tokio::test]
    async fn repeated_keywords_invoke_a_source_once() {
        let aggregator = Aggregator::new(
            vec![Arc::new(StaticSource {
                name: "fast",
                titles: vec!["충분히 긴 기사 제목"],
            })],
            Duration::from_secs(5),
        );

        let keywords = vec!["노인 건강".to_string(), "노인 건강".to_string()];
        let result = aggregator.collect(&keywords).await;
        assert_eq!(result.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn keyword_driven_sources_run_once_per_keyword() {
        let aggregator = Aggregator::new(
            vec![Arc::new(StaticSource {
                name: "fast",
                titles: vec!["충분히 긴 기사 제목"],
            })],
            Duration::from_secs(5),
        );

        let keywords = vec!["노인 건강".to_string(), "시니어 건강".to_string()];
        let result = aggregator.collect(&keywords).await;
        assert_eq!(result.outcomes.len(), 2);
    }
}
