//! The four collections a task can live in.

use std::fmt;

use crate::config::Collections;

/// Where a task currently resides. Every task id is in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// pending, retry and cancelled tasks
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Partition {
    /// Lookup order for status queries.
    pub const ALL: [Partition; 4] = [
        Partition::Pending,
        Partition::Processing,
        Partition::Completed,
        Partition::Failed,
    ];

    pub fn collection(self, collections: &Collections) -> &str {
        match self {
            Partition::Pending => &collections.pending,
            Partition::Processing => &collections.processing,
            Partition::Completed => &collections.completed,
            Partition::Failed => &collections.failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Pending => "pending",
            Partition::Processing => "processing",
            Partition::Completed => "completed",
            Partition::Failed => "failed",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
