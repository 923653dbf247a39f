//! Queue module: task placement, claiming, retry policy and statistics.
//!
//! Design intent:
//! - `TaskQueue` owns partition placement and status transitions.
//! - Workers execute processors and report the result back through
//!   `complete_task` / `fail_task`; the queue decides retry vs. failed.

mod partition;
mod retry;
mod stats;
mod task_queue;

pub use partition::Partition;
pub use retry::RetryPolicy;
pub use stats::QueueStats;
pub use task_queue::{
    CleanupReport, DEFAULT_CLEANUP_DAYS, DEFAULT_USER_TASK_LIMIT, EnqueueOptions, FailOutcome,
    TaskQueue, UserTask,
};
