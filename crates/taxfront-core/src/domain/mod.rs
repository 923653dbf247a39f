//! Domain model (ids, task record, enums, errors).

pub mod errors;
pub mod ids;
pub mod task;
pub mod timestamp;

pub use errors::{BlobError, ParseEnumError, ProcessorError, QueueError, StoreError};
pub use ids::TaskId;
pub use task::{Document, Task, TaskPriority, TaskStatus, TaskType};
