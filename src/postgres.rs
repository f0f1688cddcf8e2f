use crate::store::{ClaimOutcome, SaveReport, Store};
use crate::types::{
    Article, Language, PipelineError, Result, RunCounts, RunLedgerEntry, RunStatus, Schedule,
    ScheduledTask, SchedulerStatus, ScoredArticle, TransformedContent, TriggerKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    source_name TEXT NOT NULL,
    published_at TIMESTAMPTZ NOT NULL,
    origin_url TEXT NOT NULL,
    language TEXT NOT NULL,
    section_or_keyword TEXT NOT NULL,
    relevance_score BIGINT NOT NULL DEFAULT 0,
    duplicate_of TEXT,
    saved_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS transformed_content (
    article_id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    script TEXT,
    seo_title TEXT,
    generation_method TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id UUID PRIMARY KEY,
    owner TEXT NOT NULL,
    topic TEXT NOT NULL,
    keywords JSONB NOT NULL,
    style TEXT NOT NULL,
    target_length BIGINT NOT NULL,
    schedule JSONB NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_run_at TIMESTAMPTZ,
    next_run_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS run_ledger (
    run_id UUID PRIMARY KEY,
    task_id UUID NOT NULL,
    window_start TIMESTAMPTZ NOT NULL,
    triggered_by TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    finished_at TIMESTAMPTZ,
    status TEXT NOT NULL,
    total_found BIGINT NOT NULL DEFAULT 0,
    new_saved BIGINT NOT NULL DEFAULT 0,
    duplicates_skipped BIGINT NOT NULL DEFAULT 0,
    sources_failed BIGINT NOT NULL DEFAULT 0,
    error_detail TEXT,
    UNIQUE (task_id, window_start)
);

CREATE INDEX IF NOT EXISTS idx_run_ledger_task ON run_ledger (task_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_due ON scheduled_tasks (next_run_at) WHERE is_active;
"#;

/// Postgres-backed store. The run ledger's unique `(task_id, window_start)`
/// constraint is what makes claims atomic across processes: the insert
/// either wins the window or conflicts with the entry that did.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }
}

fn language_from(raw: &str) -> Language {
    match raw {
        "ko" => Language::Ko,
        "en" => Language::En,
        _ => Language::Unknown,
    }
}

fn status_from(raw: &str) -> RunStatus {
    match raw {
        "success" => RunStatus::Success,
        "error" => RunStatus::Error,
        _ => RunStatus::Running,
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Success => "success",
        RunStatus::Error => "error",
    }
}

fn trigger_from(raw: &str) -> TriggerKind {
    match raw {
        "manual" => TriggerKind::Manual,
        _ => TriggerKind::Cron,
    }
}

fn trigger_str(trigger: TriggerKind) -> &'static str {
    match trigger {
        TriggerKind::Manual => "manual",
        TriggerKind::Cron => "cron",
    }
}

fn method_from(raw: &str) -> crate::types::GenerationMethod {
    match raw {
        "ai" => crate::types::GenerationMethod::Ai,
        _ => crate::types::GenerationMethod::FallbackTemplate,
    }
}

fn method_str(method: crate::types::GenerationMethod) -> &'static str {
    match method {
        crate::types::GenerationMethod::Ai => "ai",
        crate::types::GenerationMethod::FallbackTemplate => "fallback-template",
    }
}

fn scored_from_row(row: &sqlx::postgres::PgRow) -> Result<ScoredArticle> {
    let language: String = row.try_get("language")?;
    Ok(ScoredArticle {
        article: Article {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            source_name: row.try_get("source_name")?,
            published_at: row.try_get("published_at")?,
            origin_url: row.try_get("origin_url")?,
            language: language_from(&language),
            section_or_keyword: row.try_get("section_or_keyword")?,
        },
        relevance_score: row.try_get("relevance_score")?,
        duplicate_of: row.try_get("duplicate_of")?,
    })
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<ScheduledTask> {
    let keywords: serde_json::Value = row.try_get("keywords")?;
    let schedule: serde_json::Value = row.try_get("schedule")?;
    let target_length: i64 = row.try_get("target_length")?;
    Ok(ScheduledTask {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        topic: row.try_get("topic")?,
        keywords: serde_json::from_value(keywords)?,
        style: row.try_get("style")?,
        target_length: target_length as usize,
        schedule: serde_json::from_value::<Schedule>(schedule)?,
        is_active: row.try_get("is_active")?,
        last_run_at: row.try_get("last_run_at")?,
        next_run_at: row.try_get("next_run_at")?,
    })
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<RunLedgerEntry> {
    let status: String = row.try_get("status")?;
    let triggered_by: String = row.try_get("triggered_by")?;
    let total_found: i64 = row.try_get("total_found")?;
    let new_saved: i64 = row.try_get("new_saved")?;
    let duplicates_skipped: i64 = row.try_get("duplicates_skipped")?;
    let sources_failed: i64 = row.try_get("sources_failed")?;
    Ok(RunLedgerEntry {
        run_id: row.try_get("run_id")?,
        task_id: row.try_get("task_id")?,
        triggered_by: trigger_from(&triggered_by),
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: status_from(&status),
        counts: RunCounts {
            total_found: total_found as u64,
            new_saved: new_saved as u64,
            duplicates_skipped: duplicates_skipped as u64,
            sources_failed: sources_failed as u64,
        },
        error_detail: row.try_get("error_detail")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn save_articles(&self, articles: &[ScoredArticle]) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        for scored in articles {
            let result = sqlx::query(
                "INSERT INTO articles \
                 (id, title, body, source_name, published_at, origin_url, language, \
                  section_or_keyword, relevance_score, duplicate_of) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&scored.article.id)
            .bind(&scored.article.title)
            .bind(&scored.article.body)
            .bind(&scored.article.source_name)
            .bind(scored.article.published_at)
            .bind(&scored.article.origin_url)
            .bind(scored.article.language.as_str())
            .bind(&scored.article.section_or_keyword)
            .bind(scored.relevance_score)
            .bind(&scored.duplicate_of)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                report.new_saved += 1;
            } else {
                report.duplicates_skipped += 1;
            }
        }
        Ok(report)
    }

    async fn recent_articles(&self, limit: usize) -> Result<Vec<ScoredArticle>> {
        let rows = sqlx::query("SELECT * FROM articles ORDER BY saved_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scored_from_row).collect()
    }

    async fn save_content(&self, content: &TransformedContent) -> Result<()> {
        sqlx::query(
            "INSERT INTO transformed_content \
             (article_id, summary, script, seo_title, generation_method, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (article_id) DO UPDATE SET \
               summary = EXCLUDED.summary, \
               script = EXCLUDED.script, \
               seo_title = EXCLUDED.seo_title, \
               generation_method = EXCLUDED.generation_method, \
               created_at = EXCLUDED.created_at",
        )
        .bind(&content.article_id)
        .bind(&content.summary)
        .bind(&content.script)
        .bind(&content.seo_title)
        .bind(method_str(content.generation_method))
        .bind(content.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn content_for(&self, article_id: &str) -> Result<Option<TransformedContent>> {
        let row = sqlx::query("SELECT * FROM transformed_content WHERE article_id = $1")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let method: String = row.try_get("generation_method")?;
            Ok(TransformedContent {
                article_id: row.try_get("article_id")?,
                summary: row.try_get("summary")?,
                script: row.try_get("script")?,
                seo_title: row.try_get("seo_title")?,
                generation_method: method_from(&method),
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_task(&self, task: &ScheduledTask) -> Result<()> {
        task.schedule.validate()?;
        sqlx::query(
            "INSERT INTO scheduled_tasks \
             (id, owner, topic, keywords, style, target_length, schedule, is_active, \
              last_run_at, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
               owner = EXCLUDED.owner, \
               topic = EXCLUDED.topic, \
               keywords = EXCLUDED.keywords, \
               style = EXCLUDED.style, \
               target_length = EXCLUDED.target_length, \
               schedule = EXCLUDED.schedule, \
               is_active = EXCLUDED.is_active, \
               last_run_at = EXCLUDED.last_run_at, \
               next_run_at = EXCLUDED.next_run_at",
        )
        .bind(task.id)
        .bind(&task.owner)
        .bind(&task.topic)
        .bind(serde_json::to_value(&task.keywords)?)
        .bind(&task.style)
        .bind(task.target_length as i64)
        .bind(serde_json::to_value(&task.schedule)?)
        .bind(task.is_active)
        .bind(task.last_run_at)
        .bind(task.next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<ScheduledTask> {
        let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => task_from_row(&row),
            None => Err(PipelineError::TaskNotFound { id }),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query("SELECT * FROM scheduled_tasks ORDER BY next_run_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_tasks \
             WHERE is_active AND next_run_at <= $1 \
             ORDER BY next_run_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn set_task_active(&self, id: Uuid, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE scheduled_tasks SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn record_task_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET last_run_at = $2, next_run_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn claim_run(
        &self,
        task_id: Uuid,
        window_start: DateTime<Utc>,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let entry = RunLedgerEntry::begin(task_id, trigger, now);
        let inserted = sqlx::query(
            "INSERT INTO run_ledger \
             (run_id, task_id, window_start, triggered_by, started_at, status) \
             VALUES ($1, $2, $3, $4, $5, 'running') \
             ON CONFLICT (task_id, window_start) DO NOTHING",
        )
        .bind(entry.run_id)
        .bind(task_id)
        .bind(window_start)
        .bind(trigger_str(trigger))
        .bind(entry.started_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed(entry));
        }

        let row = sqlx::query(
            "SELECT * FROM run_ledger WHERE task_id = $1 AND window_start = $2",
        )
        .bind(task_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(ClaimOutcome::Existing(run_from_row(&row)?))
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error_detail: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE run_ledger SET \
               status = $2, total_found = $3, new_saved = $4, duplicates_skipped = $5, \
               sources_failed = $6, error_detail = $7, finished_at = now() \
             WHERE run_id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status_str(status))
        .bind(counts.total_found as i64)
        .bind(counts.new_saved as i64)
        .bind(counts.duplicates_skipped as i64)
        .bind(counts.sources_failed as i64)
        .bind(error_detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn runs_for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<RunLedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM run_ledger WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(task_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn scheduler_status(&self) -> Result<SchedulerStatus> {
        let row = sqlx::query(
            "SELECT \
               count(*) AS total_runs, \
               count(*) FILTER (WHERE status = 'success') AS success_runs, \
               count(*) FILTER (WHERE status = 'error') AS error_runs, \
               max(started_at) AS last_run_at \
             FROM run_ledger",
        )
        .fetch_one(&self.pool)
        .await?;

        let next_due: Option<DateTime<Utc>> = sqlx::query(
            "SELECT min(next_run_at) AS next_due FROM scheduled_tasks WHERE is_active",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("next_due")?;

        let total_runs: i64 = row.try_get("total_runs")?;
        let success_runs: i64 = row.try_get("success_runs")?;
        let error_runs: i64 = row.try_get("error_runs")?;
        Ok(SchedulerStatus {
            total_runs: total_runs as u64,
            success_runs: success_runs as u64,
            error_runs: error_runs as u64,
            last_run_at: row.try_get("last_run_at")?,
            next_due,
        })
    }
}
