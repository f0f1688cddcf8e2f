use crate::types::{
    PipelineError, Result, RunCounts, RunLedgerEntry, RunStatus, ScheduledTask, SchedulerStatus,
    ScoredArticle, TransformedContent, TriggerKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What `save_articles` did with a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveReport {
    pub new_saved: u64,
    pub duplicates_skipped: u64,
}

/// Result of trying to claim a run for a due window. `Existing` means
/// another trigger already holds the window; the caller must not start
/// pipeline work for it.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(RunLedgerEntry),
    Existing(RunLedgerEntry),
}

/// The persistence gateway. Every durable effect of the pipeline goes
/// through here: articles, transformed content, task definitions, and the
/// append-only run ledger.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert articles not already present (by id). Existing ids are
    /// counted as skipped, never overwritten.
    async fn save_articles(&self, articles: &[ScoredArticle]) -> Result<SaveReport>;

    async fn recent_articles(&self, limit: usize) -> Result<Vec<ScoredArticle>>;

    async fn save_content(&self, content: &TransformedContent) -> Result<()>;

    async fn content_for(&self, article_id: &str) -> Result<Option<TransformedContent>>;

    async fn upsert_task(&self, task: &ScheduledTask) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<ScheduledTask>;

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>>;

    /// Active tasks whose `next_run_at` has passed.
    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;

    async fn set_task_active(&self, id: Uuid, active: bool) -> Result<()>;

    /// Advance a task's run bookkeeping after a completed run.
    async fn record_task_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Claim the due window starting at `window_start` for a task. The
    /// claim appends a `Running` ledger entry atomically with the check,
    /// so concurrent triggers for the same window observe each other.
    async fn claim_run(
        &self,
        task_id: Uuid,
        window_start: DateTime<Utc>,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Move a run to a terminal status. Applies only to non-terminal
    /// entries; finishing an already-finished run is a no-op.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error_detail: Option<String>,
    ) -> Result<()>;

    async fn runs_for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<RunLedgerEntry>>;

    async fn scheduler_status(&self) -> Result<SchedulerStatus>;
}

#[derive(Default)]
struct MemoryInner {
    articles: HashMap<String, ScoredArticle>,
    article_order: Vec<String>,
    contents: HashMap<String, TransformedContent>,
    tasks: HashMap<Uuid, ScheduledTask>,
    ledger: Vec<RunLedgerEntry>,
}

/// In-memory store for tests and single-process runs. One mutex guards
/// all state, which makes the claim check-and-append atomic for free.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_articles(&self, articles: &[ScoredArticle]) -> Result<SaveReport> {
        let mut inner = self.inner.lock().await;
        let mut report = SaveReport::default();
        for scored in articles {
            let id = scored.article.id.clone();
            if inner.articles.contains_key(&id) {
                report.duplicates_skipped += 1;
            } else {
                inner.articles.insert(id.clone(), scored.clone());
                inner.article_order.push(id);
                report.new_saved += 1;
            }
        }
        Ok(report)
    }

    async fn recent_articles(&self, limit: usize) -> Result<Vec<ScoredArticle>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .article_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.articles.get(id).cloned())
            .collect())
    }

    async fn save_content(&self, content: &TransformedContent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .contents
            .insert(content.article_id.clone(), content.clone());
        Ok(())
    }

    async fn content_for(&self, article_id: &str) -> Result<Option<TransformedContent>> {
        let inner = self.inner.lock().await;
        Ok(inner.contents.get(article_id).cloned())
    }

    async fn upsert_task(&self, task: &ScheduledTask) -> Result<()> {
        task.schedule.validate()?;
        let mut inner = self.inner.lock().await;
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<ScheduledTask> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(PipelineError::TaskNotFound { id })
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<_> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.next_run_at);
        Ok(tasks)
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.is_active && t.next_run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_run_at);
        Ok(due)
    }

    async fn set_task_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(PipelineError::TaskNotFound { id })?;
        task.is_active = active;
        Ok(())
    }

    async fn record_task_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(PipelineError::TaskNotFound { id })?;
        task.last_run_at = Some(last_run_at);
        task.next_run_at = next_run_at;
        Ok(())
    }

    async fn claim_run(
        &self,
        task_id: Uuid,
        window_start: DateTime<Utc>,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .ledger
            .iter()
            .find(|e| e.task_id == task_id && e.started_at >= window_start)
        {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }

        let entry = RunLedgerEntry::begin(task_id, trigger, now);
        inner.ledger.push(entry.clone());
        Ok(ClaimOutcome::Claimed(entry))
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error_detail: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner
            .ledger
            .iter_mut()
            .find(|e| e.run_id == run_id && !e.status.is_terminal())
        {
            entry.status = status;
            entry.counts = counts;
            entry.error_detail = error_detail;
            entry.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn runs_for_task(&self, task_id: Uuid, limit: usize) -> Result<Vec<RunLedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ledger
            .iter()
            .filter(|e| e.task_id == task_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn scheduler_status(&self) -> Result<SchedulerStatus> {
        let inner = self.inner.lock().await;
        Ok(SchedulerStatus {
            total_runs: inner.ledger.len() as u64,
            success_runs: inner
                .ledger
                .iter()
                .filter(|e| e.status == RunStatus::Success)
                .count() as u64,
            error_runs: inner
                .ledger
                .iter()
                .filter(|e| e.status == RunStatus::Error)
                .count() as u64,
            last_run_at: inner.ledger.iter().map(|e| e.started_at).max(),
            next_due: inner
                .tasks
                .values()
                .filter(|t| t.is_active)
                .map(|t| t.next_run_at)
                .min(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Article, Language, Schedule, ScheduleKind};
    use chrono::NaiveTime;

    fn scored(url: &str) -> ScoredArticle {
        ScoredArticle {
            article: Article::new(
                "저장 테스트용 기사",
                "",
                "src",
                None,
                url,
                Language::Ko,
                "k",
            )
            .unwrap(),
            relevance_score: 10,
            duplicate_of: None,
        }
    }

    fn task(id: Uuid, next_run_at: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask {
            id,
            owner: "tester".to_string(),
            topic: "노인 건강".to_string(),
            keywords: vec!["노인 건강".to_string()],
            style: "해설".to_string(),
            target_length: 600,
            schedule: Schedule {
                kind: ScheduleKind::Daily,
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            },
            is_active: true,
            last_run_at: None,
            next_run_at,
        }
    }

    #[tokio::test]
    async fn saving_twice_skips_existing_ids() {
        let store = MemoryStore::new();
        let batch = vec![scored("https://x.com/1"), scored("https://x.com/2")];

        let first = store.save_articles(&batch).await.unwrap();
        assert_eq!(first.new_saved, 2);
        assert_eq!(first.duplicates_skipped, 0);

        let second = store.save_articles(&batch).await.unwrap();
        assert_eq!(second.new_saved, 0);
        assert_eq!(second.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn second_claim_in_same_window_gets_existing_entry() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();
        let window = Utc::now();

        let first = store
            .claim_run(task_id, window, TriggerKind::Cron, window)
            .await
            .unwrap();
        let run_id = match first {
            ClaimOutcome::Claimed(entry) => entry.run_id,
            ClaimOutcome::Existing(_) => panic!("first claim must win"),
        };

        let second = store
            .claim_run(task_id, window, TriggerKind::Manual, window)
            .await
            .unwrap();
        match second {
            ClaimOutcome::Existing(entry) => assert_eq!(entry.run_id, run_id),
            ClaimOutcome::Claimed(_) => panic!("second claim must observe the first"),
        }
    }

    #[tokio::test]
    async fn finish_run_applies_once() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();
        let now = Utc::now();

        let ClaimOutcome::Claimed(entry) = store
            .claim_run(task_id, now, TriggerKind::Cron, now)
            .await
            .unwrap()
        else {
            panic!("claim expected");
        };

        let counts = RunCounts {
            total_found: 3,
            new_saved: 2,
            duplicates_skipped: 1,
            ..Default::default()
        };
        store
            .finish_run(entry.run_id, RunStatus::Success, counts, None)
            .await
            .unwrap();
        store
            .finish_run(
                entry.run_id,
                RunStatus::Error,
                RunCounts::default(),
                Some("late".to_string()),
            )
            .await
            .unwrap();

        let runs = store.runs_for_task(task_id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].counts.new_saved, 2);
        assert!(runs[0].error_detail.is_none());
    }

    #[tokio::test]
    async fn due_tasks_filters_inactive_and_future() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let due_id = Uuid::new_v4();
        store
            .upsert_task(&task(due_id, now - chrono::Duration::minutes(5)))
            .await
            .unwrap();

        let future_id = Uuid::new_v4();
        store
            .upsert_task(&task(future_id, now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let inactive_id = Uuid::new_v4();
        let mut inactive = task(inactive_id, now - chrono::Duration::minutes(5));
        inactive.is_active = false;
        store.upsert_task(&inactive).await.unwrap();

        let due = store.due_tasks(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_id);
    }

    #[tokio::test]
    async fn missing_task_is_an_error() {
        let store = MemoryStore::new();
        let result = store.get_task(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PipelineError::TaskNotFound { .. })));
    }
}
