use crate::aggregator::{Aggregator, SourceOutcome};
use crate::browser::BrowserFetcher;
use crate::config::PipelineConfig;
use crate::fetcher::Fetcher;
use crate::generate::ProviderSet;
use crate::rank::{Ranker, SimilarityJudge};
use crate::sources::{FeedSource, HtmlSource, NewsSource, RankingSource, SearchApiSource};
use crate::store::Store;
use crate::transform::{TransformRequest, Transformer};
use crate::types::{
    Article, PipelineError, Result, RunCounts, ScheduledTask, ScoredArticle, TransformedContent,
};
use std::sync::Arc;
use tracing::{info, warn};

/// What a read-only search pass produced.
#[derive(Debug)]
pub struct SearchReport {
    pub articles: Vec<ScoredArticle>,
    pub source_outcomes: Vec<SourceOutcome>,
}

impl SearchReport {
    pub fn sources_failed(&self) -> usize {
        self.source_outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .count()
    }
}

/// The collect → rank → transform → persist composition. One `run` is a
/// full pass for a keyword set; the scheduler wraps it with ledger
/// bookkeeping, manual triggers can call it directly.
pub struct Pipeline {
    aggregator: Aggregator,
    ranker: Ranker,
    judge: SimilarityJudge,
    transformer: Transformer,
    store: Arc<dyn Store>,
}

impl Pipeline {
    pub fn new(
        aggregator: Aggregator,
        ranker: Ranker,
        judge: SimilarityJudge,
        transformer: Transformer,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            aggregator,
            ranker,
            judge,
            transformer,
            store,
        }
    }

    /// Assemble the standard source set from configuration. The search API
    /// adapter only joins when credentials are present; the feed and
    /// ranking adapters are always on.
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn Store>) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
        let browser = Arc::new(BrowserFetcher::new(
            Arc::clone(&fetcher),
            config.browser.clone(),
        ));

        let mut sources: Vec<Arc<dyn NewsSource>> = Vec::new();
        if let Some(search) = &config.search_api {
            sources.push(Arc::new(SearchApiSource::new(
                Arc::clone(&fetcher),
                search.clone(),
            )));
        }
        sources.push(Arc::new(FeedSource::new(
            Arc::clone(&fetcher),
            config.feed_base_url.clone(),
        )));
        sources.push(Arc::new(RankingSource::new(
            browser,
            config.ranking_origin.clone(),
        )));
        if !config.html_pages.is_empty() {
            sources.push(Arc::new(HtmlSource::new(
                Arc::clone(&fetcher),
                config.html_pages.clone(),
            )));
        }

        let providers = Arc::new(ProviderSet::configure(config));
        Ok(Self::new(
            Aggregator::new(sources, config.search_budget),
            Ranker::new(config.trusted_sources.clone(), config.top_n),
            SimilarityJudge::new(Arc::clone(&providers)),
            Transformer::new(providers),
            store,
        ))
    }

    pub async fn run_for_task(&self, task: &ScheduledTask) -> Result<RunCounts> {
        let request = TransformRequest {
            style: task.style.clone(),
            target_length: task.target_length,
        };
        self.run(&task.keywords, &request).await
    }

    /// Collect and rank without persisting: the read-only search surface.
    /// The report carries the per-source outcomes, so an empty article
    /// list is distinguishable from sources having failed.
    pub async fn search(&self, keywords: &[String]) -> Result<SearchReport> {
        if !self.aggregator.has_sources() {
            return Err(PipelineError::Configuration(
                "no sources configured".to_string(),
            ));
        }
        let aggregate = self.aggregator.collect(keywords).await;
        let outcome = self.ranker.rank(aggregate.articles, keywords);
        let (kept, _) = self.judge.fold(outcome.ranked).await;
        Ok(SearchReport {
            articles: kept,
            source_outcomes: aggregate.outcomes,
        })
    }

    /// Transform a single article. Infallible by construction: the
    /// transformer's template path answers when generation cannot.
    pub async fn transform_article(
        &self,
        article: &Article,
        request: &TransformRequest,
    ) -> TransformedContent {
        self.transformer.transform(article, request).await
    }

    /// Execute one pass. Fails only when every source failed, none are
    /// configured, or the store rejects the batch; partial source
    /// failures are logged and absorbed.
    pub async fn run(&self, keywords: &[String], request: &TransformRequest) -> Result<RunCounts> {
        if !self.aggregator.has_sources() {
            return Err(PipelineError::Configuration(
                "no sources configured".to_string(),
            ));
        }
        let aggregate = self.aggregator.collect(keywords).await;
        if aggregate.all_failed() {
            let detail = aggregate
                .outcomes
                .iter()
                .filter_map(|o| o.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::Upstream(format!(
                "all sources failed: {}",
                detail
            )));
        }
        let mut sources_failed = 0u64;
        for outcome in aggregate.outcomes.iter().filter(|o| o.error.is_some()) {
            sources_failed += 1;
            warn!(
                source = outcome.source,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Source degraded during this pass"
            );
        }

        let total_found = aggregate.articles.len() as u64;
        let outcome = self.ranker.rank(aggregate.articles, keywords);
        let (kept, near_duplicates) = self.judge.fold(outcome.ranked).await;
        let batch_duplicates = (outcome.duplicates.len() + near_duplicates.len()) as u64;

        let report = self.store.save_articles(&kept).await?;

        // Transform only what this pass actually introduced; articles seen
        // in earlier runs already have content.
        for scored in &kept {
            if self.store.content_for(&scored.article.id).await?.is_some() {
                continue;
            }
            let content = self.transformer.transform(&scored.article, request).await;
            self.store.save_content(&content).await?;
        }

        let counts = RunCounts {
            total_found,
            new_saved: report.new_saved,
            duplicates_skipped: batch_duplicates + report.duplicates_skipped,
            sources_failed,
        };
        info!(
            total_found = counts.total_found,
            new_saved = counts.new_saved,
            duplicates_skipped = counts.duplicates_skipped,
            sources_failed = counts.sources_failed,
            "Pipeline pass complete"
        );
        Ok(counts)
    }
}
