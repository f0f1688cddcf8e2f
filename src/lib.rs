pub mod aggregator;
pub mod browser;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod generate;
pub mod pipeline;
pub mod postgres;
pub mod rank;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod transform;
pub mod types;

pub use aggregator::{AggregateResult, Aggregator, SourceOutcome};
pub use config::PipelineConfig;
pub use pipeline::{Pipeline, SearchReport};
pub use rank::{Ranker, SimilarityJudge};
pub use scheduler::{next_run_after, Scheduler, TaskSpec};
pub use sources::{NewsSource, SourceFetch};
pub use store::{ClaimOutcome, MemoryStore, SaveReport, Store};
pub use transform::{TransformRequest, Transformer};
pub use types::{
    Article, GenerationMethod, PipelineError, Result, RunCounts, RunLedgerEntry, RunStatus,
    Schedule, ScheduleKind, ScheduledTask, SchedulerStatus, ScoredArticle, TransformedContent,
    TriggerKind,
};
