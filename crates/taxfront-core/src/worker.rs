use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::domain::{QueueError, TaskId, TaskType};
use crate::processors::ProcessorRegistry;
use crate::queue::{FailOutcome, TaskQueue};

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing claimable (or the claim was lost).
    Idle,
    Completed(TaskId),
    Retrying(TaskId),
    Failed(TaskId),
    /// The task left processing before we could report on it.
    Abandoned(TaskId),
}

/// One polling worker. `run_once` is the unit the loop repeats.
pub struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    registry: Arc<ProcessorRegistry>,
    task_types: Option<Vec<TaskType>>,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<TaskQueue>,
        registry: Arc<ProcessorRegistry>,
        task_types: Option<Vec<TaskType>>,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            task_types,
        }
    }

    /// Claim one task, run its processor and report the result to the queue.
    pub async fn run_once(&self) -> Result<WorkOutcome, QueueError> {
        let Some(task) = self.queue.get_next_task(self.task_types.as_deref()).await? else {
            return Ok(WorkOutcome::Idle);
        };
        let task_id = task.id.clone();

        let Some(processor) = self.registry.get(task.task_type) else {
            warn!(worker = self.id, %task_id, task_type = %task.task_type, "no processor registered");
            let msg = format!("no processor registered for task type {}", task.task_type);
            return self.fail(task_id, &msg, false).await;
        };

        if !processor.validate_payload(&task.payload) {
            let msg = format!("invalid payload for {} task", task.task_type);
            return self.fail(task_id, &msg, false).await;
        }

        // a zero timeout would expire before the processor is polled
        let limit = Duration::from_secs(task.timeout_seconds.max(1));
        match tokio::time::timeout(limit, processor.process(&task)).await {
            Ok(Ok(result)) => {
                if self.queue.complete_task(&task_id, Some(result)).await? {
                    Ok(WorkOutcome::Completed(task_id))
                } else {
                    Ok(WorkOutcome::Abandoned(task_id))
                }
            }
            Ok(Err(err)) => {
                warn!(worker = self.id, %task_id, error = %err, "processor failed");
                self.fail(task_id, &err.to_string(), err.is_retryable()).await
            }
            Err(_elapsed) => {
                let msg = format!("timed out after {}s", limit.as_secs());
                warn!(worker = self.id, %task_id, "{msg}");
                self.fail(task_id, &msg, true).await
            }
        }
    }

    async fn fail(&self, task_id: TaskId, msg: &str, retry: bool) -> Result<WorkOutcome, QueueError> {
        Ok(match self.queue.fail_task(&task_id, msg, retry).await? {
            Some(FailOutcome::Retrying { .. }) => WorkOutcome::Retrying(task_id),
            Some(FailOutcome::Failed { .. }) => WorkOutcome::Failed(task_id),
            None => WorkOutcome::Abandoned(task_id),
        })
    }
}

/// Worker group handle.
/// - dropping or signalling `shutdown_tx` stops every worker
/// - `shutdown_and_join()` waits for them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one queue and registry.
    pub fn spawn(
        n: usize,
        queue: Arc<TaskQueue>,
        registry: Arc<ProcessorRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker::new(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&registry),
                config.task_types.clone(),
            );
            let mut rx = shutdown_rx.clone();
            let poll_interval = config.poll_interval;

            let join = tokio::spawn(async move {
                worker_loop(worker, poll_interval, &mut rx).await;
            });
            joins.push(join);
        }

        info!(workers = n, "worker group started");
        Self { shutdown_tx, joins }
    }

    /// Stop taking new tasks. In-flight processing is not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
        info!("worker group stopped");
    }
}

async fn worker_loop(worker: Worker, poll_interval: Duration, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match worker.run_once().await {
            Ok(WorkOutcome::Idle) => true,
            Ok(outcome) => {
                debug!(worker = worker.id, ?outcome, "task handled");
                false
            }
            Err(e) => {
                // store trouble: back off like an empty poll, then try again
                error!(worker = worker.id, error = %e, "queue error");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
