use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical representation of a news item, independent of which upstream
/// produced it. Immutable once created; adapters drop anything that cannot
/// satisfy the title/url invariant instead of propagating partial records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Stable key derived from the canonical URL (or a provider id).
    pub id: String,
    pub title: String,
    /// May be empty when only a snippet/description was available.
    pub body: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub origin_url: String,
    pub language: Language,
    /// The query or section that produced this article.
    pub section_or_keyword: String,
}

impl Article {
    /// Build an article, enforcing the non-empty title/url invariant.
    /// Returns `None` for records that must be dropped at the adapter boundary.
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        source_name: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
        origin_url: impl Into<String>,
        language: Language,
        section_or_keyword: impl Into<String>,
    ) -> Option<Self> {
        let title = title.into().trim().to_string();
        let origin_url = origin_url.into().trim().to_string();
        if title.is_empty() || origin_url.is_empty() {
            return None;
        }
        Some(Self {
            id: article_id(&origin_url),
            title,
            body: body.into(),
            source_name: source_name.into(),
            // Absent timestamps default to ingestion time.
            published_at: published_at.unwrap_or_else(Utc::now),
            origin_url,
            language,
            section_or_keyword: section_or_keyword.into(),
        })
    }
}

/// Derive the stable article key from its canonical URL.
pub fn article_id(origin_url: &str) -> String {
    origin_url.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ko,
    En,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ko => "ko",
            Language::En => "en",
            Language::Unknown => "unknown",
        }
    }
}

/// An article plus its ranking signal. `duplicate_of` is an audit
/// back-reference to the surviving article's id, never an ownership link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredArticle {
    pub article: Article,
    pub relevance_score: i64,
    pub duplicate_of: Option<String>,
}

/// How a piece of transformed content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMethod {
    Ai,
    FallbackTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedContent {
    pub article_id: String,
    pub summary: String,
    pub script: Option<String>,
    pub seo_title: Option<String>,
    pub generation_method: GenerationMethod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ScheduleKind {
    Daily,
    Weekly { days: Vec<chrono::Weekday> },
    Monthly { day: u32 },
}

/// A recurrence definition: what kind of cadence, and at which local time
/// of day (UTC) the run is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(flatten)]
    pub kind: ScheduleKind,
    pub time: NaiveTime,
}

impl Schedule {
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ScheduleKind::Daily => Ok(()),
            ScheduleKind::Weekly { days } => {
                if days.is_empty() {
                    Err(PipelineError::Configuration(
                        "weekly schedule requires at least one weekday".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            ScheduleKind::Monthly { day } => {
                if (1..=31).contains(day) {
                    Ok(())
                } else {
                    Err(PipelineError::Configuration(format!(
                        "monthly schedule day out of range: {}",
                        day
                    )))
                }
            }
        }
    }
}

/// A persisted recurring job definition. Mutated only by the scheduler
/// (advancing run bookkeeping) or by explicit user edits; deactivated
/// rather than deleted once it has ledger history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub owner: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub style: String,
    pub target_length: usize,
    pub schedule: Schedule,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Cron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Error)
    }
}

/// Per-run accounting carried into the ledger. `sources_failed` keeps
/// degraded sources visible even when the pass still produced articles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub total_found: u64,
    pub new_saved: u64,
    pub duplicates_skipped: u64,
    pub sources_failed: u64,
}

/// One append-only record per pipeline execution attempt. Written with
/// `Running` before any work starts; updated in place to a terminal
/// status exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedgerEntry {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub triggered_by: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub error_detail: Option<String>,
}

impl RunLedgerEntry {
    pub fn begin(task_id: Uuid, triggered_by: TriggerKind, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_id,
            triggered_by,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            error_detail: None,
        }
    }
}

/// Aggregate view over the ledger, for status endpoints and the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub total_runs: u64,
    pub success_runs: u64,
    pub error_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Budget of {budget_ms}ms exceeded")]
    Timeout { budget_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_requires_title_and_url() {
        assert!(Article::new("", "body", "src", None, "https://x", Language::Ko, "k").is_none());
        assert!(Article::new("제목", "body", "src", None, "  ", Language::Ko, "k").is_none());
        let article =
            Article::new(" 제목 ", "body", "src", None, "https://x/a", Language::Ko, "k").unwrap();
        assert_eq!(article.title, "제목");
        assert_eq!(article.id, "https://x/a");
    }

    #[test]
    fn schedule_validation() {
        let ok = Schedule {
            kind: ScheduleKind::Weekly {
                days: vec![chrono::Weekday::Mon],
            },
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(ok.validate().is_ok());

        let empty_week = Schedule {
            kind: ScheduleKind::Weekly { days: vec![] },
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(empty_week.validate().is_err());

        let bad_day = Schedule {
            kind: ScheduleKind::Monthly { day: 32 },
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(bad_day.validate().is_err());
    }

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }
}
