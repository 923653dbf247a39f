//! TaskQueue - task placement and lifecycle on top of a `DocumentStore`.
//!
//! # Partitions
//! - pending: `pending`, `retry` and `cancelled` tasks
//! - processing: claimed tasks (`in_progress`)
//! - completed / failed: terminal tasks
//!
//! Every transition writes the task to its new partition before deleting it
//! from the old one, so a crash leaves at worst a duplicate, never a loss.
//!
//! # Claiming
//! One conditional update on the pending record (status still `pending` or
//! `retry`) decides the winner. A worker whose update fails treats it as a
//! lost race and reports nothing to claim.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{
    Document, QueueError, StoreError, Task, TaskId, TaskPriority, TaskStatus, TaskType, timestamp,
};
use crate::ports::{
    Clock, Direction, DocumentStore, FieldOp, IdGenerator, Precondition, Query, SystemClock,
    UlidGenerator,
};

use super::partition::Partition;
use super::stats::QueueStats;

type Result<T> = std::result::Result<T, QueueError>;

pub const DEFAULT_USER_TASK_LIMIT: usize = 50;
pub const DEFAULT_CLEANUP_DAYS: u32 = 30;

/// Optional knobs for `enqueue_task`.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: TaskPriority,
    /// Not claimable before this instant; `None` means immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: TaskPriority::Normal,
            scheduled_at: None,
            max_retries: crate::domain::task::DEFAULT_MAX_RETRIES,
            timeout_seconds: crate::domain::task::DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl EnqueueOptions {
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// What `fail_task` did with the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in pending with status `retry`.
    Retrying {
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
    },
    /// Moved to the failed partition for good.
    Failed { retry_count: u32 },
}

/// A task as listed for a user, tagged with the collection it was found in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTask {
    #[serde(skip)]
    pub partition: Partition,
    pub collection: String,
    #[serde(flatten)]
    pub task: Task,
}

/// Records deleted by `cleanup_old_tasks`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub completed: usize,
    pub failed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

pub struct TaskQueue {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn DocumentStore>, config: QueueConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            store,
            clock,
            ids,
            config,
        }
    }

    /// Replace the clock. Also re-bases the default ULID generator on it;
    /// call `with_id_generator` afterwards to override ids.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn collection(&self, partition: Partition) -> &str {
        partition.collection(&self.config.collections)
    }

    /// Add a task to the pending partition. The payload is stored as given.
    pub async fn enqueue_task(
        &self,
        task_type: TaskType,
        user_id: &str,
        payload: Document,
        options: EnqueueOptions,
    ) -> Result<TaskId> {
        let now = self.clock.now();
        let mut task = Task::new(self.ids.generate_task_id(), task_type, user_id, payload, now);
        task.priority = options.priority;
        task.max_retries = options.max_retries;
        task.timeout_seconds = options.timeout_seconds;
        if let Some(at) = options.scheduled_at {
            task.scheduled_at = Some(timestamp::truncate(at));
        }

        self.write(Partition::Pending, &task).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority.value(),
            %user_id,
            "task enqueued"
        );
        Ok(task.id)
    }

    /// Claim the highest-priority, oldest eligible task and move it to processing.
    ///
    /// Returns `None` when nothing is eligible, or when another worker won the
    /// claim for the candidate.
    pub async fn get_next_task(&self, task_types: Option<&[TaskType]>) -> Result<Option<Task>> {
        let now = timestamp::truncate(self.clock.now());
        let pending = self.collection(Partition::Pending);

        let mut query = Query::new()
            .filter("status", FieldOp::In, claimable_statuses())
            .filter("scheduled_at", FieldOp::Le, timestamp::to_value(&now));
        if let Some(types) = task_types {
            let types: Vec<Value> = types.iter().map(|t| Value::from(t.as_str())).collect();
            query = query.filter("type", FieldOp::In, types);
        }
        let query = query
            .order_by("priority", Direction::Descending)
            .order_by("created_at", Direction::Ascending)
            .limit(1);

        let Some(candidate) = self.store.query(pending, &query).await?.into_iter().next() else {
            return Ok(None);
        };
        let mut task = decode(pending, &candidate.id, candidate.data)?;
        let unclaimed = task.clone();
        task.mark_started(now);

        let mut claim = Document::new();
        claim.insert("status".into(), Value::from(task.status.as_str()));
        claim.insert("started_at".into(), timestamp::to_value(&now));
        claim.insert("updated_at".into(), timestamp::to_value(&task.updated_at));
        let precondition = Precondition::field_in("status", claimable_statuses());

        if let Err(e) = self.store.update(pending, task.id.as_str(), claim, precondition).await {
            warn!(task_id = %task.id, error = %e, "claim lost");
            return Ok(None);
        }

        if let Err(e) = self.write(Partition::Processing, &task).await {
            self.release_claim(&unclaimed).await;
            return Err(e);
        }
        self.store.delete(pending, task.id.as_str()).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "task claimed");
        Ok(Some(task))
    }

    /// Put a won claim back when the task could not be moved to processing.
    /// Best effort: the caller reports the original error either way.
    async fn release_claim(&self, unclaimed: &Task) {
        let mut fields = Document::new();
        fields.insert("status".into(), Value::from(unclaimed.status.as_str()));
        fields.insert(
            "started_at".into(),
            unclaimed.started_at.as_ref().map_or(Value::Null, timestamp::to_value),
        );
        fields.insert("updated_at".into(), timestamp::to_value(&unclaimed.updated_at));
        let precondition =
            Precondition::field_in("status", [Value::from(TaskStatus::InProgress.as_str())]);

        let pending = self.collection(Partition::Pending);
        match self.store.update(pending, unclaimed.id.as_str(), fields, precondition).await {
            Ok(()) => warn!(task_id = %unclaimed.id, "claim released"),
            Err(e) => error!(task_id = %unclaimed.id, error = %e, "claim release failed"),
        }
    }

    /// Mark a claimed task completed. `false` (and no change) if it is not in processing.
    pub async fn complete_task(&self, task_id: &TaskId, result: Option<Document>) -> Result<bool> {
        let Some(mut task) = self.read(Partition::Processing, task_id).await? else {
            warn!(%task_id, "complete_task: task not in processing");
            return Ok(false);
        };
        task.mark_completed(self.clock.now(), result);

        self.write(Partition::Completed, &task).await?;
        self.remove(Partition::Processing, task_id).await?;
        self.remove(Partition::Pending, task_id).await?;
        info!(%task_id, task_type = %task.task_type, "task completed");
        Ok(true)
    }

    /// Record a failed attempt; schedule a retry while the budget allows.
    ///
    /// `None` (and no change) if the task is not in processing.
    pub async fn fail_task(
        &self,
        task_id: &TaskId,
        error_message: &str,
        retry: bool,
    ) -> Result<Option<FailOutcome>> {
        let Some(mut task) = self.read(Partition::Processing, task_id).await? else {
            warn!(%task_id, "fail_task: task not in processing");
            return Ok(None);
        };
        let now = self.clock.now();
        task.record_failure(error_message, now);

        if retry && task.has_retries_left() {
            let at = self.config.retry.retry_at(now, task.retry_count);
            task.schedule_retry(at, now);
            self.write(Partition::Pending, &task).await?;
            self.remove(Partition::Processing, task_id).await?;

            let scheduled_at = task.scheduled_at.unwrap_or(at);
            info!(
                %task_id,
                retry_count = task.retry_count,
                scheduled_at = %timestamp::format(&scheduled_at),
                error = %error_message,
                "task scheduled for retry"
            );
            return Ok(Some(FailOutcome::Retrying {
                retry_count: task.retry_count,
                scheduled_at,
            }));
        }

        task.mark_failed(now);
        self.write(Partition::Failed, &task).await?;
        self.remove(Partition::Processing, task_id).await?;
        self.remove(Partition::Pending, task_id).await?;
        warn!(
            %task_id,
            retry_count = task.retry_count,
            error = %error_message,
            "task failed permanently"
        );
        Ok(Some(FailOutcome::Failed {
            retry_count: task.retry_count,
        }))
    }

    /// First hit across pending, processing, completed, failed.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<Option<Task>> {
        for partition in Partition::ALL {
            if let Some(task) = self.read(partition, task_id).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// A user's tasks from every partition, newest first.
    pub async fn get_user_tasks(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<UserTask>> {
        let mut query = Query::new().where_eq("user_id", user_id);
        if let Some(status) = status {
            query = query.where_eq("status", status.as_str());
        }
        let query = query
            .order_by("created_at", Direction::Descending)
            .limit(limit);

        let mut tasks = Vec::new();
        for partition in Partition::ALL {
            let collection = self.collection(partition);
            for snap in self.store.query(collection, &query).await? {
                tasks.push(UserTask {
                    partition,
                    collection: collection.to_string(),
                    task: decode(collection, &snap.id, snap.data)?,
                });
            }
        }

        tasks.sort_by(|a, b| b.task.created_at.cmp(&a.task.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }

    /// Cancel a task that has not been claimed yet. `true` only if it was cancelled.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        let Some(mut task) = self.read(Partition::Pending, task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            debug!(%task_id, status = %task.status, "cancel refused");
            return Ok(false);
        }
        task.mark_cancelled(self.clock.now());

        let mut fields = Document::new();
        fields.insert("status".into(), Value::from(task.status.as_str()));
        fields.insert("updated_at".into(), timestamp::to_value(&task.updated_at));
        let precondition = Precondition::field_in("status", [Value::from(TaskStatus::Pending.as_str())]);

        let pending = self.collection(Partition::Pending);
        match self.store.update(pending, task_id.as_str(), fields, precondition).await {
            Ok(()) => {
                info!(%task_id, "task cancelled");
                Ok(true)
            }
            Err(StoreError::NotFound { .. } | StoreError::PreconditionFailed { .. }) => {
                debug!(%task_id, "cancel lost to a concurrent claim");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete completed and failed tasks older than `days_old` days.
    pub async fn cleanup_old_tasks(&self, days_old: u32) -> Result<CleanupReport> {
        let cutoff = self.clock.now() - TimeDelta::days(i64::from(days_old));
        let report = CleanupReport {
            completed: self
                .purge_before(Partition::Completed, "completed_at", cutoff)
                .await?,
            // failed tasks carry no completed_at; updated_at is their terminal time
            failed: self
                .purge_before(Partition::Failed, "updated_at", cutoff)
                .await?,
        };
        info!(
            completed = report.completed,
            failed = report.failed,
            days_old,
            "old tasks cleaned up"
        );
        Ok(report)
    }

    async fn purge_before(
        &self,
        partition: Partition,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let collection = self.collection(partition);
        let batch = self.config.cleanup_batch_size.max(1);
        let query = Query::new()
            .filter(field, FieldOp::Lt, timestamp::to_value(&cutoff))
            .order_by(field, Direction::Ascending)
            .limit(batch);

        let mut deleted = 0;
        loop {
            let ids: Vec<String> = self
                .store
                .query(collection, &query)
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            if ids.is_empty() {
                break;
            }
            self.store.batch_delete(collection, &ids).await?;
            deleted += ids.len();
            debug!(%partition, batch = ids.len(), "cleanup batch deleted");
            if ids.len() < batch {
                break;
            }
        }
        Ok(deleted)
    }

    /// Counts per partition and breakdowns of waiting work. Scans whole collections.
    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let now = self.clock.now();
        let midnight = timestamp::to_value(&now.date_naive().and_time(NaiveTime::MIN).and_utc());
        let mut stats = QueueStats::default();

        let waiting = Query::new().filter("status", FieldOp::In, claimable_statuses());
        for snap in self
            .store
            .query(self.collection(Partition::Pending), &waiting)
            .await?
        {
            let doc = snap.data;
            match doc.get("status").and_then(Value::as_str) {
                Some("retry") => stats.retrying += 1,
                _ => stats.pending += 1,
            }
            let task_type = doc
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let priority = match doc.get("priority") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => "unknown".to_string(),
            };
            stats.count_waiting(task_type, priority);
        }

        stats.in_progress = self
            .store
            .query(self.collection(Partition::Processing), &Query::new())
            .await?
            .len();

        let since = |field: &str| Query::new().filter(field, FieldOp::Ge, midnight.clone());
        stats.completed_today = self
            .store
            .query(self.collection(Partition::Completed), &since("completed_at"))
            .await?
            .len();
        stats.failed_today = self
            .store
            .query(self.collection(Partition::Failed), &since("updated_at"))
            .await?
            .len();

        Ok(stats)
    }

    async fn read(&self, partition: Partition, task_id: &TaskId) -> Result<Option<Task>> {
        let collection = self.collection(partition);
        match self.store.get(collection, task_id.as_str()).await? {
            Some(doc) => Ok(Some(decode(collection, task_id.as_str(), doc)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, partition: Partition, task: &Task) -> Result<()> {
        let doc = task.to_document().map_err(|source| QueueError::Encode {
            id: task.id.to_string(),
            source,
        })?;
        self.store
            .set(self.collection(partition), task.id.as_str(), doc)
            .await?;
        Ok(())
    }

    async fn remove(&self, partition: Partition, task_id: &TaskId) -> Result<()> {
        self.store
            .delete(self.collection(partition), task_id.as_str())
            .await?;
        Ok(())
    }
}

fn claimable_statuses() -> Vec<Value> {
    TaskStatus::ALL
        .iter()
        .filter(|s| s.is_claimable())
        .map(|s| Value::from(s.as_str()))
        .collect()
}

fn decode(collection: &str, id: &str, doc: Document) -> Result<Task> {
    Task::from_document(doc).map_err(|source| QueueError::Decode {
        collection: collection.to_string(),
        id: id.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryDocumentStore;
    use crate::ports::{FixedClock, Snapshot};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// "task-0001", "task-0002", ...
    #[derive(Default)]
    struct SequentialIds(AtomicU64);

    impl IdGenerator for SequentialIds {
        fn generate_task_id(&self) -> TaskId {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            TaskId::new(format!("task-{n:04}"))
        }
    }

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        clock: Arc<FixedClock>,
        queue: TaskQueue,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
    }

    fn fixture_with(config: QueueConfig) -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let clock = Arc::new(FixedClock::new(start()));
        let queue = TaskQueue::new(store.clone(), config)
            .with_clock(clock.clone())
            .with_id_generator(Arc::new(SequentialIds::default()));
        Fixture { store, clock, queue }
    }

    fn fixture() -> Fixture {
        fixture_with(QueueConfig::default())
    }

    fn payload(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    impl Fixture {
        async fn enqueue(&self, task_type: TaskType, priority: TaskPriority) -> TaskId {
            self.queue
                .enqueue_task(
                    task_type,
                    "user-1",
                    Document::new(),
                    EnqueueOptions::default().priority(priority),
                )
                .await
                .unwrap()
        }

        /// Partitions holding `id`.
        async fn residency(&self, id: &TaskId) -> Vec<Partition> {
            let mut found = Vec::new();
            for p in Partition::ALL {
                let collection = p.collection(&self.queue.config().collections);
                if self.store.contains(collection, id.as_str()).await {
                    found.push(p);
                }
            }
            found
        }

        async fn claim(&self) -> Option<Task> {
            self.queue.get_next_task(None).await.unwrap()
        }
    }

    #[tokio::test]
    async fn enqueue_writes_a_pending_record() {
        let f = fixture();
        let id = f
            .queue
            .enqueue_task(
                TaskType::FormGeneration,
                "user-9",
                payload(json!({ "form_type": "FORM_1040" })),
                EnqueueOptions::default().max_retries(5).timeout_seconds(60),
            )
            .await
            .unwrap();

        assert_eq!(id.as_str(), "task-0001");
        assert_eq!(f.residency(&id).await, vec![Partition::Pending]);

        let task = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.user_id, "user-9");
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.timeout_seconds, 60);
        assert_eq!(task.scheduled_at, Some(start()));
        assert_eq!(task.payload["form_type"], json!("FORM_1040"));
    }

    #[tokio::test]
    async fn higher_priority_is_served_before_older_normal() {
        let f = fixture();
        let b = f.enqueue(TaskType::Notification, TaskPriority::Normal).await;
        f.clock.advance(TimeDelta::seconds(1));
        let a = f.enqueue(TaskType::Notification, TaskPriority::High).await;

        assert_eq!(f.claim().await.unwrap().id, a);
        assert_eq!(f.claim().await.unwrap().id, b);
        assert!(f.claim().await.is_none());
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let f = fixture();
        let first = f.enqueue(TaskType::Backup, TaskPriority::Low).await;
        f.clock.advance(TimeDelta::seconds(1));
        let second = f.enqueue(TaskType::Backup, TaskPriority::Low).await;

        assert_eq!(f.claim().await.unwrap().id, first);
        assert_eq!(f.claim().await.unwrap().id, second);
    }

    #[tokio::test]
    async fn claim_moves_task_to_processing() {
        let f = fixture();
        let id = f.enqueue(TaskType::Notification, TaskPriority::Urgent).await;
        f.clock.advance(TimeDelta::seconds(5));

        let task = f.claim().await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.started_at, Some(start() + TimeDelta::seconds(5)));
        assert_eq!(f.residency(&id).await, vec![Partition::Processing]);

        let stored = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn future_tasks_and_other_types_are_skipped() {
        let f = fixture();
        f.queue
            .enqueue_task(
                TaskType::Notification,
                "user-1",
                Document::new(),
                EnqueueOptions::default().scheduled_at(start() + TimeDelta::minutes(10)),
            )
            .await
            .unwrap();
        let report = f.enqueue(TaskType::AiAnalysis, TaskPriority::Normal).await;

        let only_notifications = [TaskType::Notification];
        assert!(f.queue.get_next_task(Some(&only_notifications)).await.unwrap().is_none());

        let task = f.queue.get_next_task(Some(&[TaskType::AiAnalysis])).await.unwrap().unwrap();
        assert_eq!(task.id, report);

        f.clock.advance(TimeDelta::minutes(10));
        assert!(f.queue.get_next_task(Some(&only_notifications)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_a_task_once() {
        let f = fixture();
        f.enqueue(TaskType::Notification, TaskPriority::Normal).await;
        let queue = Arc::new(f.queue);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { q.get_next_task(None).await }));
        }
        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap().unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn retries_back_off_then_fail() {
        let f = fixture();
        let id = f.enqueue(TaskType::Notification, TaskPriority::Normal).await;

        for (attempt, minutes) in [(1, 2), (2, 4), (3, 8)] {
            let task = f.claim().await.unwrap();
            assert_eq!(task.id, id);
            let now = f.clock.now();

            let outcome = f.queue.fail_task(&id, "boom", true).await.unwrap().unwrap();
            let expected_at = now + TimeDelta::minutes(minutes);
            assert_eq!(
                outcome,
                FailOutcome::Retrying {
                    retry_count: attempt,
                    scheduled_at: expected_at
                }
            );
            let stored = f.queue.get_task_status(&id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Retry);
            assert_eq!(stored.scheduled_at, Some(expected_at));
            assert_eq!(f.residency(&id).await, vec![Partition::Pending]);

            // not claimable until the backoff elapses
            assert!(f.claim().await.is_none());
            f.clock.set(expected_at);
        }

        f.claim().await.unwrap();
        let outcome = f.queue.fail_task(&id, "boom", true).await.unwrap().unwrap();
        assert_eq!(outcome, FailOutcome::Failed { retry_count: 4 });

        let stored = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(f.residency(&id).await, vec![Partition::Failed]);
    }

    #[tokio::test]
    async fn fail_without_retry_is_terminal() {
        let f = fixture();
        let id = f.enqueue(TaskType::FormGeneration, TaskPriority::Normal).await;
        f.claim().await.unwrap();

        let outcome = f.queue.fail_task(&id, "bad form", false).await.unwrap();
        assert_eq!(outcome, Some(FailOutcome::Failed { retry_count: 1 }));
        assert_eq!(f.residency(&id).await, vec![Partition::Failed]);

        // already gone from processing
        assert_eq!(f.queue.fail_task(&id, "again", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let f = fixture();
        let id = f.enqueue(TaskType::AiAnalysis, TaskPriority::Normal).await;
        f.claim().await.unwrap();
        f.clock.advance(TimeDelta::seconds(3));

        let result = payload(json!({ "success": true }));
        assert!(f.queue.complete_task(&id, Some(result.clone())).await.unwrap());
        let done = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completed_at, Some(start() + TimeDelta::seconds(3)));
        assert_eq!(done.result, Some(result));

        f.clock.advance(TimeDelta::seconds(3));
        assert!(!f.queue.complete_task(&id, None).await.unwrap());
        assert_eq!(f.residency(&id).await, vec![Partition::Completed]);
        assert_eq!(f.queue.get_task_status(&id).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn cancel_only_while_pending() {
        let f = fixture();
        let pending = f.enqueue(TaskType::Backup, TaskPriority::Low).await;
        let running = f.enqueue(TaskType::Notification, TaskPriority::Urgent).await;
        let done = f.enqueue(TaskType::Notification, TaskPriority::High).await;
        let failed = f.enqueue(TaskType::Notification, TaskPriority::Normal).await;

        assert_eq!(f.claim().await.unwrap().id, running);
        assert_eq!(f.claim().await.unwrap().id, done);
        f.queue.complete_task(&done, None).await.unwrap();
        assert_eq!(f.claim().await.unwrap().id, failed);
        f.queue.fail_task(&failed, "x", false).await.unwrap();

        for id in [&running, &done, &failed] {
            let before = f.queue.get_task_status(id).await.unwrap();
            assert!(!f.queue.cancel_task(id).await.unwrap());
            assert_eq!(f.queue.get_task_status(id).await.unwrap(), before);
        }
        assert!(!f.queue.cancel_task(&TaskId::from("nope")).await.unwrap());

        assert!(f.queue.cancel_task(&pending).await.unwrap());
        let cancelled = f.queue.get_task_status(&pending).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(f.residency(&pending).await, vec![Partition::Pending]);

        // cancelled tasks are never claimed, and cancelling twice is refused
        assert!(f.claim().await.is_none());
        assert!(!f.queue.cancel_task(&pending).await.unwrap());
    }

    #[tokio::test]
    async fn retrying_tasks_cannot_be_cancelled() {
        let f = fixture();
        let id = f.enqueue(TaskType::Notification, TaskPriority::Normal).await;
        f.claim().await.unwrap();
        f.queue.fail_task(&id, "smtp down", true).await.unwrap();

        let before = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(before.status, TaskStatus::Retry);
        assert!(!f.queue.cancel_task(&id).await.unwrap());
        assert_eq!(f.queue.get_task_status(&id).await.unwrap().unwrap(), before);
        assert_eq!(f.residency(&id).await, vec![Partition::Pending]);
    }

    #[tokio::test]
    async fn smtp_failure_is_retried_after_backoff() {
        let f = fixture();
        let id = f
            .queue
            .enqueue_task(
                TaskType::Notification,
                "user-1",
                payload(json!({
                    "notification_type": "email",
                    "recipient": "a@b.com",
                    "message": { "subject": "Your return is ready" },
                })),
                EnqueueOptions::default().priority(TaskPriority::Urgent),
            )
            .await
            .unwrap();

        let t1 = f.claim().await.unwrap();
        assert_eq!(t1.id, id);

        f.queue.fail_task(&id, "smtp down", true).await.unwrap();
        let stored = f.queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(f.residency(&id).await, vec![Partition::Pending]);
        assert_eq!(stored.status, TaskStatus::Retry);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.scheduled_at, Some(start() + TimeDelta::minutes(2)));

        f.clock.advance(TimeDelta::minutes(2) + TimeDelta::seconds(1));
        let again = f.claim().await.unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.retry_count, 1);
    }

    #[tokio::test]
    async fn user_tasks_span_partitions_newest_first() {
        let f = fixture();
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(f.enqueue(TaskType::Notification, TaskPriority::Normal).await);
            f.clock.advance(TimeDelta::seconds(1));
        }
        f.queue
            .enqueue_task(TaskType::Backup, "someone-else", Document::new(), EnqueueOptions::default())
            .await
            .unwrap();

        // ids[0] -> completed, ids[1] -> processing, others stay pending
        f.queue.get_next_task(None).await.unwrap();
        f.queue.complete_task(&ids[0], None).await.unwrap();
        f.queue.get_next_task(None).await.unwrap();

        let listed = f.queue.get_user_tasks("user-1", None, 50).await.unwrap();
        let order: Vec<&TaskId> = listed.iter().map(|u| &u.task.id).collect();
        assert_eq!(order, vec![&ids[3], &ids[2], &ids[1], &ids[0]]);
        assert_eq!(listed[2].partition, Partition::Processing);
        assert_eq!(listed[3].collection, "task_completed");

        let top = f.queue.get_user_tasks("user-1", None, 2).await.unwrap();
        assert_eq!(top.len(), 2);

        let done = f
            .queue
            .get_user_tasks("user-1", Some(TaskStatus::Completed), 50)
            .await
            .unwrap();
        assert_eq!(done.len(), 1);

        let json = serde_json::to_value(&listed[0]).unwrap();
        assert_eq!(json["collection"], json!("task_queue"));
        assert_eq!(json["id"], json!(ids[3].as_str()));
        assert!(json.get("partition").is_none());
    }

    #[tokio::test]
    async fn cleanup_pages_through_old_terminal_tasks() {
        let f = fixture_with(QueueConfig {
            cleanup_batch_size: 2,
            ..QueueConfig::default()
        });

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(f.enqueue(TaskType::Cleanup, TaskPriority::Normal).await);
        }
        // five finish long ago, one fails long ago
        for id in &ids[..5] {
            f.claim().await.unwrap();
            f.queue.complete_task(id, None).await.unwrap();
        }
        f.claim().await.unwrap();
        f.queue.fail_task(&ids[5], "x", false).await.unwrap();

        f.clock.advance(TimeDelta::days(40));
        let recent = f.enqueue(TaskType::Cleanup, TaskPriority::Normal).await;
        f.claim().await.unwrap();
        f.queue.complete_task(&recent, None).await.unwrap();

        let report = f.queue.cleanup_old_tasks(DEFAULT_CLEANUP_DAYS).await.unwrap();
        assert_eq!(report, CleanupReport { completed: 5, failed: 1 });
        assert_eq!(report.total(), 6);
        assert!(f.queue.get_task_status(&ids[0]).await.unwrap().is_none());
        assert!(f.queue.get_task_status(&recent).await.unwrap().is_some());

        let again = f.queue.cleanup_old_tasks(DEFAULT_CLEANUP_DAYS).await.unwrap();
        assert_eq!(again.total(), 0);
    }

    #[tokio::test]
    async fn stats_count_each_partition() {
        let f = fixture();
        let yesterday_done = f.enqueue(TaskType::Backup, TaskPriority::Low).await;
        f.claim().await.unwrap();
        f.queue.complete_task(&yesterday_done, None).await.unwrap();
        f.clock.advance(TimeDelta::days(1));

        let done = f.enqueue(TaskType::Notification, TaskPriority::Urgent).await;
        let failed = f.enqueue(TaskType::Notification, TaskPriority::High).await;
        let retrying = f.enqueue(TaskType::AiAnalysis, TaskPriority::Normal).await;
        f.enqueue(TaskType::AiAnalysis, TaskPriority::Normal).await;
        f.enqueue(TaskType::Notification, TaskPriority::Low).await;

        f.claim().await.unwrap();
        f.queue.complete_task(&done, None).await.unwrap();
        f.claim().await.unwrap();
        f.queue.fail_task(&failed, "x", false).await.unwrap();
        f.claim().await.unwrap();
        f.queue.fail_task(&retrying, "x", true).await.unwrap();
        f.claim().await.unwrap(); // second ai_analysis stays in processing

        let stats = f.queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.failed_today, 1);
        assert_eq!(stats.by_type.get("ai_analysis"), Some(&1));
        assert_eq!(stats.by_type.get("notification"), Some(&1));
        assert_eq!(stats.by_priority.get("1"), Some(&1));
        assert_eq!(stats.by_priority.get("2"), Some(&1));
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let f = fixture();
        f.enqueue(TaskType::Notification, TaskPriority::Normal).await;
        f.store.set_offline(true);

        assert!(matches!(
            f.queue.get_next_task(None).await,
            Err(QueueError::Store(StoreError::Unavailable(_)))
        ));
        assert!(f.queue.get_queue_stats().await.is_err());
        assert!(
            f.queue
                .enqueue_task(TaskType::Backup, "u", Document::new(), EnqueueOptions::default())
                .await
                .is_err()
        );
    }

    /// Delegates to an in-memory store but rejects every `update`.
    struct RejectingUpdates(InMemoryDocumentStore);

    #[async_trait]
    impl DocumentStore for RejectingUpdates {
        async fn set(&self, c: &str, id: &str, doc: Document) -> std::result::Result<(), StoreError> {
            self.0.set(c, id, doc).await
        }
        async fn merge(&self, c: &str, id: &str, f: Document) -> std::result::Result<(), StoreError> {
            self.0.merge(c, id, f).await
        }
        async fn get(&self, c: &str, id: &str) -> std::result::Result<Option<Document>, StoreError> {
            self.0.get(c, id).await
        }
        async fn update(
            &self,
            _c: &str,
            _id: &str,
            _f: Document,
            _p: Precondition,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("deadline exceeded".into()))
        }
        async fn delete(&self, c: &str, id: &str) -> std::result::Result<(), StoreError> {
            self.0.delete(c, id).await
        }
        async fn query(&self, c: &str, q: &Query) -> std::result::Result<Vec<Snapshot>, StoreError> {
            self.0.query(c, q).await
        }
        async fn batch_delete(&self, c: &str, ids: &[String]) -> std::result::Result<(), StoreError> {
            self.0.batch_delete(c, ids).await
        }
        async fn increment(
            &self,
            c: &str,
            id: &str,
            field: &str,
            delta: i64,
        ) -> std::result::Result<(), StoreError> {
            self.0.increment(c, id, field, delta).await
        }
    }

    #[tokio::test]
    async fn claim_update_errors_read_as_nothing_to_do() {
        let store = Arc::new(RejectingUpdates(InMemoryDocumentStore::new()));
        let queue = TaskQueue::new(store.clone(), QueueConfig::default())
            .with_clock(Arc::new(FixedClock::new(start())));
        let id = queue
            .enqueue_task(TaskType::Notification, "u", Document::new(), EnqueueOptions::default())
            .await
            .unwrap();

        assert!(queue.get_next_task(None).await.unwrap().is_none());
        let task = queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(queue.cancel_task(&id).await.is_err());
    }

    /// Fails the first `remaining` writes into the processing collection.
    struct FlakyProcessingWrites {
        inner: InMemoryDocumentStore,
        remaining: AtomicU64,
    }

    #[async_trait]
    impl DocumentStore for FlakyProcessingWrites {
        async fn set(&self, c: &str, id: &str, doc: Document) -> std::result::Result<(), StoreError> {
            if c == "task_processing"
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.set(c, id, doc).await
        }
        async fn merge(&self, c: &str, id: &str, f: Document) -> std::result::Result<(), StoreError> {
            self.inner.merge(c, id, f).await
        }
        async fn get(&self, c: &str, id: &str) -> std::result::Result<Option<Document>, StoreError> {
            self.inner.get(c, id).await
        }
        async fn update(
            &self,
            c: &str,
            id: &str,
            f: Document,
            p: Precondition,
        ) -> std::result::Result<(), StoreError> {
            self.inner.update(c, id, f, p).await
        }
        async fn delete(&self, c: &str, id: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(c, id).await
        }
        async fn query(&self, c: &str, q: &Query) -> std::result::Result<Vec<Snapshot>, StoreError> {
            self.inner.query(c, q).await
        }
        async fn batch_delete(&self, c: &str, ids: &[String]) -> std::result::Result<(), StoreError> {
            self.inner.batch_delete(c, ids).await
        }
        async fn increment(
            &self,
            c: &str,
            id: &str,
            field: &str,
            delta: i64,
        ) -> std::result::Result<(), StoreError> {
            self.inner.increment(c, id, field, delta).await
        }
    }

    #[tokio::test]
    async fn failed_move_to_processing_releases_the_claim() {
        let store = Arc::new(FlakyProcessingWrites {
            inner: InMemoryDocumentStore::new(),
            remaining: AtomicU64::new(1),
        });
        let queue = TaskQueue::new(store.clone(), QueueConfig::default())
            .with_clock(Arc::new(FixedClock::new(start())));
        let id = queue
            .enqueue_task(TaskType::Notification, "u", Document::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let err = queue.get_next_task(None).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));

        let task = queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.started_at, None);
        assert!(!store.inner.contains("task_processing", id.as_str()).await);

        let claimed = queue.get_next_task(None).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert!(queue.complete_task(&id, None).await.unwrap());
        assert_eq!(
            queue.get_task_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn released_retry_keeps_its_status() {
        let store = Arc::new(FlakyProcessingWrites {
            inner: InMemoryDocumentStore::new(),
            remaining: AtomicU64::new(0),
        });
        let clock = Arc::new(FixedClock::new(start()));
        let queue = TaskQueue::new(store.clone(), QueueConfig::default()).with_clock(clock.clone());
        let id = queue
            .enqueue_task(TaskType::Notification, "u", Document::new(), EnqueueOptions::default())
            .await
            .unwrap();
        queue.get_next_task(None).await.unwrap().unwrap();
        queue.fail_task(&id, "smtp down", true).await.unwrap();

        clock.advance(TimeDelta::minutes(5));
        store.remaining.store(1, Ordering::SeqCst);
        assert!(queue.get_next_task(None).await.is_err());

        let task = queue.get_task_status(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Retry);
        assert_eq!(task.retry_count, 1);
        assert_eq!(queue.get_next_task(None).await.unwrap().unwrap().id, id);
    }
}
