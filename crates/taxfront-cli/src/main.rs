use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taxfront_core::config::parse_task_types;
use taxfront_core::domain::{Document, TaskId, TaskPriority, TaskStatus, TaskType};
use taxfront_core::impls::{
    FsBlobStore, InMemoryDocumentStore, KeywordAnalyzer, LogNotifier, MetadataOnlyExtractor,
    StoreSnapshot,
};
use taxfront_core::ports::SystemClock;
use taxfront_core::processors::{ProcessorContext, ProcessorRegistry};
use taxfront_core::queue::{DEFAULT_CLEANUP_DAYS, DEFAULT_USER_TASK_LIMIT, EnqueueOptions};
use taxfront_core::{QueueConfig, TaskQueue, WorkOutcome, Worker, WorkerConfig, WorkerGroup};

/// TaxFront task queue - enqueue, process and inspect background tasks
#[derive(Parser, Debug)]
#[command(name = "taxfront")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON file holding the document store between runs
    #[arg(long, global = true, default_value = "taxfront-state.json")]
    state: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a task to the queue
    Enqueue {
        /// Task type (document_processing, form_generation, ai_analysis, notification, ...)
        #[arg(long = "type")]
        task_type: TaskType,

        #[arg(long)]
        user: String,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,

        /// low, normal, high, urgent (or 1-4)
        #[arg(long, default_value = "normal")]
        priority: TaskPriority,

        /// Not claimable for this many seconds
        #[arg(long)]
        delay_seconds: Option<u64>,

        #[arg(long)]
        max_retries: Option<u32>,

        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// Run workers
    Work {
        /// Number of concurrent workers (overrides TAXFRONT_WORKER_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Comma-separated task types to take (overrides TAXFRONT_TASK_TYPES)
        #[arg(long)]
        types: Option<String>,

        /// Poll interval in milliseconds (overrides TAXFRONT_POLL_INTERVAL_MS)
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Process until nothing is claimable, then exit
        #[arg(long)]
        until_idle: bool,

        /// Directory standing in for the storage bucket
        #[arg(long, default_value = ".")]
        blob_root: PathBuf,
    },
    /// Show one task
    Status { id: String },
    /// List a user's tasks, newest first
    UserTasks {
        user: String,

        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(short, long, default_value_t = DEFAULT_USER_TASK_LIMIT)]
        limit: usize,
    },
    /// Cancel a pending task
    Cancel { id: String },
    /// Queue statistics
    Stats,
    /// Delete completed/failed tasks older than N days
    Cleanup {
        #[arg(long, default_value_t = DEFAULT_CLEANUP_DAYS)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let store = Arc::new(load_state(&args.state)?);
    let queue_config = QueueConfig::from_env().context("queue configuration")?;
    let queue = Arc::new(TaskQueue::new(store.clone(), queue_config));

    let outcome = run(args.command, &queue, &store).await;
    // persist whatever happened, even when the command failed half-way
    save_state(&args.state, &store.snapshot().await)?;
    outcome
}

async fn run(command: Command, queue: &Arc<TaskQueue>, store: &Arc<InMemoryDocumentStore>) -> anyhow::Result<()> {
    match command {
        Command::Enqueue {
            task_type,
            user,
            payload,
            priority,
            delay_seconds,
            max_retries,
            timeout_seconds,
        } => {
            let payload: Document = serde_json::from_str(&payload).context("--payload must be a JSON object")?;
            let mut options = EnqueueOptions::default().priority(priority);
            if let Some(secs) = delay_seconds {
                let delay = chrono_seconds(secs)?;
                options = options.scheduled_at(queue.clock().now() + delay);
            }
            if let Some(n) = max_retries {
                options = options.max_retries(n);
            }
            if let Some(secs) = timeout_seconds {
                options = options.timeout_seconds(secs);
            }
            let id = queue.enqueue_task(task_type, &user, payload, options).await?;
            print_json(&serde_json::json!({ "task_id": id }))
        }
        Command::Work {
            concurrency,
            types,
            poll_interval_ms,
            until_idle,
            blob_root,
        } => {
            let mut config = WorkerConfig::from_env().context("worker configuration")?;
            if let Some(n) = concurrency {
                if n == 0 {
                    bail!("--concurrency must be at least 1");
                }
                config.concurrency = n;
            }
            if let Some(raw) = types {
                config.task_types = parse_task_types(&raw)?;
            }
            if let Some(ms) = poll_interval_ms {
                config.poll_interval = Duration::from_millis(ms);
            }

            let ctx = ProcessorContext {
                store: store.clone(),
                blobs: Arc::new(FsBlobStore::new(blob_root)),
                extractor: Arc::new(MetadataOnlyExtractor::new()),
                analyzer: Arc::new(KeywordAnalyzer::new()),
                notifier: Arc::new(LogNotifier::new()),
                clock: Arc::new(SystemClock),
            };
            let registry = Arc::new(ProcessorRegistry::standard(&ctx));

            if until_idle {
                drain(queue, registry, config).await
            } else {
                let group = WorkerGroup::spawn(config.concurrency, Arc::clone(queue), registry, config);
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                info!("shutting down");
                group.shutdown_and_join().await;
                Ok(())
            }
        }
        Command::Status { id } => {
            let task = queue.get_task_status(&TaskId::from(id.as_str())).await?;
            match task {
                Some(task) => print_json(&task),
                None => bail!("task {id} not found"),
            }
        }
        Command::UserTasks { user, status, limit } => {
            let tasks = queue.get_user_tasks(&user, status, limit).await?;
            print_json(&tasks)
        }
        Command::Cancel { id } => {
            let cancelled = queue.cancel_task(&TaskId::from(id.as_str())).await?;
            print_json(&serde_json::json!({ "task_id": id, "cancelled": cancelled }))
        }
        Command::Stats => print_json(&queue.get_queue_stats().await?),
        Command::Cleanup { days } => print_json(&queue.cleanup_old_tasks(days).await?),
    }
}

/// Single worker, one task at a time, until a poll comes back idle.
async fn drain(queue: &Arc<TaskQueue>, registry: Arc<ProcessorRegistry>, config: WorkerConfig) -> anyhow::Result<()> {
    let worker = Worker::new(0, Arc::clone(queue), registry, config.task_types);
    let mut handled = Vec::new();
    loop {
        match worker.run_once().await? {
            WorkOutcome::Idle => break,
            outcome => handled.push(format!("{outcome:?}")),
        }
    }
    print_json(&handled)
}

fn chrono_seconds(secs: u64) -> anyhow::Result<chrono::TimeDelta> {
    let secs = i64::try_from(secs).context("--delay-seconds is too large")?;
    chrono::TimeDelta::try_seconds(secs).context("--delay-seconds is too large")
}

fn load_state(path: &Path) -> anyhow::Result<InMemoryDocumentStore> {
    if !path.exists() {
        return Ok(InMemoryDocumentStore::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot: StoreSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(InMemoryDocumentStore::from_snapshot(snapshot))
}

fn save_state(path: &Path, snapshot: &StoreSnapshot) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
