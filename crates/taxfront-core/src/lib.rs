//! taxfront-core
//!
//! Background task queue for the TaxFront backend.
//!
//! # モジュール構成
//! - **domain**: task record, enums, ids, timestamps, errors
//! - **ports**: DocumentStore, BlobStore, Clock, IdGenerator, DocumentExtractor, Analyzer, Notifier
//! - **impls**: in-memory / filesystem adapters for development and tests
//! - **queue**: TaskQueue (enqueue, claim, complete, fail/retry, cancel, cleanup, stats)
//! - **processors**: per-type processors and the registry
//! - **worker**: polling workers and the worker group
//! - **config**: QueueConfig / WorkerConfig from `TAXFRONT_*` variables

pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod processors;
pub mod queue;
pub mod worker;

pub use config::{ConfigError, QueueConfig, WorkerConfig};
pub use queue::TaskQueue;
pub use worker::{WorkOutcome, Worker, WorkerGroup};
