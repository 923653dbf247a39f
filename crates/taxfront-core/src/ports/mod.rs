//! Ports - the seams to external systems.
//!
//! Each trait hides one collaborator (document database, blob bucket, AI
//! backend, notification provider) so the queue and processors can run
//! against in-memory adapters in tests.
//!
//! # Principles
//! - The document store is the source of truth for task state.
//! - Claiming relies on the store's atomic conditional update.
//! - Time and ids are injected (`Clock`, `IdGenerator`).

pub mod analyzer;
pub mod blob_store;
pub mod clock;
pub mod document_store;
pub mod extractor;
pub mod id_generator;
pub mod notifier;

pub use self::analyzer::{AnalysisKind, Analyzer};
pub use self::blob_store::BlobStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::document_store::{
    Direction, DocumentStore, FieldOp, Filter, OrderBy, Precondition, Query, Snapshot,
};
pub use self::extractor::{DocumentExtractor, Extraction};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{Delivery, Notifier};
