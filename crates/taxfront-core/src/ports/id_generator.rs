//! IdGenerator port - id generation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID text ids (time-sortable, no coordination between workers)

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID-based generator.
///
/// The timestamp part comes from the injected `Clock`, so a `FixedClock`
/// yields ids with a deterministic prefix and a random suffix.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::new(ulid.to_string())
    }
}
