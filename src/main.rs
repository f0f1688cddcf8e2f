use anyhow::Result;
use clap::{Parser, Subcommand};
use news_pipeline::postgres::PgStore;
use news_pipeline::scheduler::{Scheduler, TaskSpec};
use news_pipeline::types::{Schedule, ScheduleKind};
use news_pipeline::{MemoryStore, Pipeline, PipelineConfig, Store, TransformRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "news-pipeline", about = "Automated news collection and content pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one collection pass for the configured keywords and exit
    Run {
        /// Keywords to search, comma-separated (defaults to configuration)
        #[arg(long)]
        keywords: Option<String>,
    },
    /// Run the scheduler loop, executing tasks as they come due
    Serve {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 60)]
        poll_secs: u64,
    },
    /// Create a daily task and print its id
    AddTask {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        keywords: String,
        /// Time of day (UTC) as HH:MM
        #[arg(long, default_value = "09:00")]
        time: String,
    },
    /// Trigger a task immediately
    Trigger {
        #[arg(long)]
        task_id: Uuid,
        /// Why the run is being forced, recorded in the logs
        #[arg(long, default_value = "manual cli trigger")]
        reason: String,
    },
    /// Print ledger totals and the next due time
    Status,
}

async fn open_store() -> Result<Arc<dyn Store>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            info!("Using Postgres store");
            Ok(Arc::new(PgStore::connect(&url).await?))
        }
        Err(_) => {
            info!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    let store = open_store().await?;
    let pipeline = Arc::new(Pipeline::from_config(&config, Arc::clone(&store))?);

    match cli.command {
        Command::Run { keywords } => {
            let keywords: Vec<String> = keywords
                .map(|k| k.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| config.default_keywords.clone());
            let counts = pipeline.run(&keywords, &TransformRequest::default()).await?;
            println!(
                "found {} articles, saved {} new, skipped {} duplicates, {} sources failed",
                counts.total_found, counts.new_saved, counts.duplicates_skipped, counts.sources_failed
            );
        }
        Command::Serve { poll_secs } => {
            let scheduler = Scheduler::new(store, pipeline, Duration::from_secs(poll_secs));
            scheduler.run_loop().await;
        }
        Command::AddTask {
            topic,
            keywords,
            time,
        } => {
            let time = chrono::NaiveTime::parse_from_str(&time, "%H:%M")?;
            let scheduler = Scheduler::new(store, pipeline, Duration::from_secs(60));
            let task = scheduler
                .create_task(TaskSpec {
                    owner: "cli".to_string(),
                    topic,
                    keywords: keywords.split(',').map(|s| s.trim().to_string()).collect(),
                    style: "친근한 해설".to_string(),
                    target_length: 600,
                    schedule: Schedule {
                        kind: ScheduleKind::Daily,
                        time,
                    },
                })
                .await?;
            println!("created task {} (next run {})", task.id, task.next_run_at);
        }
        Command::Trigger { task_id, reason } => {
            let scheduler = Scheduler::new(store, pipeline, Duration::from_secs(60));
            let entry = scheduler.trigger(task_id, &reason).await?;
            if entry.finished_at.is_some() {
                println!(
                    "run {} finished with status {:?}: saved {} new",
                    entry.run_id, entry.status, entry.counts.new_saved
                );
            } else {
                println!("run {} already claimed this window", entry.run_id);
            }
        }
        Command::Status => {
            let scheduler = Scheduler::new(store, pipeline, Duration::from_secs(60));
            let status = scheduler.status().await?;
            println!(
                "{} runs ({} ok, {} failed), last run {:?}, next due {:?}",
                status.total_runs,
                status.success_runs,
                status.error_runs,
                status.last_run_at,
                status.next_due
            );
        }
    }

    Ok(())
}
