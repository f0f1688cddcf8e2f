use crate::pipeline::Pipeline;
use crate::store::{ClaimOutcome, Store};
use crate::types::{
    Result, RunLedgerEntry, RunStatus, Schedule, ScheduleKind, ScheduledTask, SchedulerStatus,
    TriggerKind,
};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Compute the first occurrence of a schedule strictly after `after`.
/// Monthly days beyond a month's length clamp to its last day.
pub fn next_run_after(schedule: &Schedule, after: DateTime<Utc>) -> DateTime<Utc> {
    match &schedule.kind {
        ScheduleKind::Daily => {
            let candidate = at_time(after.date_naive(), schedule, after);
            if candidate > after {
                candidate
            } else {
                at_time(after.date_naive() + ChronoDuration::days(1), schedule, after)
            }
        }
        ScheduleKind::Weekly { days } => {
            for offset in 0..=7 {
                let date = after.date_naive() + ChronoDuration::days(offset);
                let candidate = at_time(date, schedule, after);
                if days.contains(&date.weekday()) && candidate > after {
                    return candidate;
                }
            }
            // Unreachable for a validated schedule; degrade to daily.
            at_time(after.date_naive() + ChronoDuration::days(1), schedule, after)
        }
        ScheduleKind::Monthly { day } => {
            let mut year = after.year();
            let mut month = after.month();
            for _ in 0..13 {
                let date = clamp_to_month(year, month, *day);
                let candidate = at_time(date, schedule, after);
                if candidate > after {
                    return candidate;
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
            at_time(after.date_naive() + ChronoDuration::days(1), schedule, after)
        }
    }
}

fn at_time(date: NaiveDate, schedule: &Schedule, fallback: DateTime<Utc>) -> DateTime<Utc> {
    match Utc.from_local_datetime(&date.and_time(schedule.time)).single() {
        Some(dt) => dt,
        None => fallback + ChronoDuration::days(1),
    }
}

fn clamp_to_month(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        // Last day of the requested month.
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .map(|d| d - ChronoDuration::days(1))
            .unwrap_or_default()
    })
}

/// Definition of a new recurring job; ids and run bookkeeping are filled
/// in by the scheduler.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub owner: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub style: String,
    pub target_length: usize,
    pub schedule: Schedule,
}

/// Drives tasks through their due windows. Every run, cron or manual,
/// passes through the ledger claim, so a window executes at most once no
/// matter how many triggers race for it.
pub struct Scheduler {
    store: Arc<dyn Store>,
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<Pipeline>, poll_interval: Duration) -> Self {
        Self {
            store,
            pipeline,
            poll_interval,
        }
    }

    pub async fn create_task(&self, spec: TaskSpec) -> Result<ScheduledTask> {
        spec.schedule.validate()?;
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            owner: spec.owner,
            topic: spec.topic,
            keywords: spec.keywords,
            style: spec.style,
            target_length: spec.target_length,
            next_run_at: next_run_after(&spec.schedule, Utc::now()),
            schedule: spec.schedule,
            is_active: true,
            last_run_at: None,
        };
        self.store.upsert_task(&task).await?;
        info!(task_id = %task.id, topic = task.topic, next_run_at = %task.next_run_at, "Task created");
        Ok(task)
    }

    /// Run a task immediately, logging who or what asked for it. Shares
    /// the due-window claim with cron execution: a manual trigger racing a
    /// cron run for the same window gets the existing ledger entry back
    /// instead of a second run.
    pub async fn trigger(&self, task_id: Uuid, reason: &str) -> Result<RunLedgerEntry> {
        let task = self.store.get_task(task_id).await?;
        info!(task_id = %task_id, reason, "Manual trigger requested");
        self.execute(&task, TriggerKind::Manual, Utc::now()).await
    }

    /// One poll: claim and execute every task whose window has opened.
    /// Returns one ledger entry per due task, whether this poll ran it or
    /// an earlier claimant did.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<RunLedgerEntry>> {
        let due = self.store.due_tasks(now).await?;
        let mut entries = Vec::new();
        for task in due {
            match self.execute(&task, TriggerKind::Cron, now).await {
                Ok(entry) => entries.push(entry),
                Err(e) => error!(task_id = %task.id, error = %e, "Task execution failed"),
            }
        }
        Ok(entries)
    }

    /// Poll forever. Intended to be spawned as the process's scheduler
    /// loop.
    pub async fn run_loop(&self) {
        info!(poll_secs = self.poll_interval.as_secs(), "Scheduler loop started");
        loop {
            if let Err(e) = self.run_due(Utc::now()).await {
                error!(error = %e, "Scheduler poll failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.store.scheduler_status().await
    }

    async fn execute(
        &self,
        task: &ScheduledTask,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<RunLedgerEntry> {
        // A due task's window starts when it became due; a manual run
        // ahead of schedule opens its own window at the trigger instant.
        let window_start = if task.next_run_at <= now {
            task.next_run_at
        } else {
            now
        };

        let entry = match self
            .store
            .claim_run(task.id, window_start, trigger, now)
            .await?
        {
            ClaimOutcome::Claimed(entry) => entry,
            ClaimOutcome::Existing(existing) => {
                // Not an error: the window already ran or is running.
                info!(
                    task_id = %task.id,
                    run_id = %existing.run_id,
                    "Window already claimed, skipping"
                );
                return Ok(existing);
            }
        };

        info!(task_id = %task.id, run_id = %entry.run_id, ?trigger, "Run started");
        let (status, counts, error_detail) = match self.pipeline.run_for_task(task).await {
            Ok(counts) => (RunStatus::Success, counts, None),
            Err(e) => {
                warn!(task_id = %task.id, run_id = %entry.run_id, error = %e, "Run failed");
                (RunStatus::Error, Default::default(), Some(e.to_string()))
            }
        };

        self.store
            .finish_run(entry.run_id, status, counts, error_detail.clone())
            .await?;

        // The task advances even after a failed run; retrying inside the
        // same window would violate the at-most-once claim anyway.
        let next_run_at = next_run_after(&task.schedule, now);
        self.store.record_task_run(task.id, now, next_run_at).await?;

        let mut finished = entry;
        finished.status = status;
        finished.counts = counts;
        finished.error_detail = error_detail;
        finished.finished_at = Some(Utc::now());
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn schedule(kind: ScheduleKind, hour: u32) -> Schedule {
        Schedule {
            kind,
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_time_passed() {
        let s = schedule(ScheduleKind::Daily, 9);
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 8)), at(2024, 1, 15, 9));
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 9)), at(2024, 1, 16, 9));
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 10)), at(2024, 1, 16, 9));
    }

    #[test]
    fn weekly_finds_next_listed_weekday() {
        // 2024-01-15 is a Monday.
        let s = schedule(
            ScheduleKind::Weekly {
                days: vec![Weekday::Mon, Weekday::Thu],
            },
            9,
        );
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 8)), at(2024, 1, 15, 9));
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 10)), at(2024, 1, 18, 9));
        assert_eq!(next_run_after(&s, at(2024, 1, 18, 10)), at(2024, 1, 22, 9));
    }

    #[test]
    fn monthly_clamps_to_short_months() {
        let s = schedule(ScheduleKind::Monthly { day: 31 }, 9);
        assert_eq!(next_run_after(&s, at(2024, 1, 31, 10)), at(2024, 2, 29, 9));
        assert_eq!(next_run_after(&s, at(2024, 2, 29, 10)), at(2024, 3, 31, 9));
    }

    #[test]
    fn monthly_same_month_when_day_ahead() {
        let s = schedule(ScheduleKind::Monthly { day: 20 }, 9);
        assert_eq!(next_run_after(&s, at(2024, 1, 15, 8)), at(2024, 1, 20, 9));
        assert_eq!(next_run_after(&s, at(2024, 1, 20, 10)), at(2024, 2, 20, 9));
    }
}
