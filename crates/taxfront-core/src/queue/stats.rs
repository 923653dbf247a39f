use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of queue depth, as returned by `TaskQueue::get_queue_stats`.
///
/// `by_type` / `by_priority` cover waiting work (pending and retry);
/// priorities are keyed by their stored integer ("1".."4").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub retrying: usize,
    pub in_progress: usize,
    pub completed_today: usize,
    pub failed_today: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

impl QueueStats {
    pub(crate) fn count_waiting(&mut self, task_type: String, priority: String) {
        *self.by_type.entry(task_type).or_default() += 1;
        *self.by_priority.entry(priority).or_default() += 1;
    }
}
