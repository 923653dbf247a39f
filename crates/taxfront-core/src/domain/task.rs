//! Task record: the persisted unit of work.
//!
//! Design:
//! - This is the single shape written to every partition (pending / processing /
//!   completed / failed). Partition placement is owned by `TaskQueue`.
//! - State transitions happen through methods, never by poking `status` from
//!   outside the queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ParseEnumError;
use super::ids::TaskId;
use super::timestamp;

/// A JSON object with string keys. Used for payloads, results and raw records.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Kind of work a task represents. Persisted as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DocumentProcessing,
    FormGeneration,
    AiAnalysis,
    TaxCalculation,
    Notification,
    Backup,
    Cleanup,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::DocumentProcessing,
        TaskType::FormGeneration,
        TaskType::AiAnalysis,
        TaskType::TaxCalculation,
        TaskType::Notification,
        TaskType::Backup,
        TaskType::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::DocumentProcessing => "document_processing",
            TaskType::FormGeneration => "form_generation",
            TaskType::AiAnalysis => "ai_analysis",
            TaskType::TaxCalculation => "tax_calculation",
            TaskType::Notification => "notification",
            TaskType::Backup => "backup",
            TaskType::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("task type", s))
    }
}

/// Lifecycle status of a task.
///
/// State transitions:
/// - Pending -> InProgress -> Completed
/// - Pending -> InProgress -> Retry -> InProgress ... (until max_retries)
/// - Pending -> InProgress -> Failed
/// - Pending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Retry,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Retry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retry => "retry",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Can a worker claim a task in this state (once `scheduled_at` has passed)?
    ///
    /// `Retry` is treated exactly like `Pending`.
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retry)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("task status", s))
    }
}

/// Priority level. Persisted as its integer value; higher is served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl From<TaskPriority> for u8 {
    fn from(p: TaskPriority) -> Self {
        p.value()
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = ParseEnumError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskPriority::Low),
            2 => Ok(TaskPriority::Normal),
            3 => Ok(TaskPriority::High),
            4 => Ok(TaskPriority::Urgent),
            other => Err(ParseEnumError::new("task priority", other.to_string())),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

impl FromStr for TaskPriority {
    type Err = ParseEnumError;

    /// Accepts either the name (`high`) or the stored integer (`3`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => other
                .parse::<u8>()
                .map_err(|_| ParseEnumError::new("task priority", s))
                .and_then(TaskPriority::try_from),
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// One unit of work and its retry bookkeeping.
///
/// Serializes to the flat persisted layout: enums as their string/int value,
/// timestamps as ISO-8601 strings, absent optionals as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub user_id: String,
    #[serde(default)]
    pub payload: Document,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "timestamp::option", default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option", default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<Document>,
    /// Soft execution budget. The queue only records it; the worker enforces it.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Task {
    /// A fresh pending task, eligible immediately.
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        user_id: impl Into<String>,
        payload: Document,
        now: DateTime<Utc>,
    ) -> Self {
        let now = timestamp::truncate(now);
        Self {
            id,
            task_type,
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            user_id: user_id.into(),
            payload,
            created_at: now,
            updated_at: now,
            scheduled_at: Some(now),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            result: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    /// Claimable status and `scheduled_at` not in the future.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Bump `updated_at`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let now = timestamp::truncate(now);
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(timestamp::truncate(now));
        self.touch(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>, result: Option<Document>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(timestamp::truncate(now));
        if result.is_some() {
            self.result = result;
        }
        self.touch(now);
    }

    /// Count one failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.touch(now);
    }

    /// Whether the retry budget still covers the attempt just recorded.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count <= self.max_retries
    }

    pub fn schedule_retry(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = TaskStatus::Retry;
        self.scheduled_at = Some(timestamp::truncate(at));
        self.touch(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.touch(now);
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.touch(now);
    }

    /// Persisted mapping for this task.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "task serialized to non-object: {other}"
            ))),
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(doc))
    }
}
