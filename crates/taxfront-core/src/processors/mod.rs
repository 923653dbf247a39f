//! Processors - per-type task execution.
//!
//! # 構成
//! - `TaskProcessor`: object-safe trait the worker calls (`Arc<dyn TaskProcessor>`)
//! - `PayloadProcessor`: typed trait; the payload is decoded with serde first
//! - `Typed<P>`: adapter from `PayloadProcessor` to `TaskProcessor` (type erasure)
//!
//! Processors only produce a result or an error. Moving the task between
//! partitions is the queue's job.

pub mod analysis;
pub mod document;
pub mod form;
pub mod notification;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::{Document, ProcessorError, Task, TaskType};
use crate::ports::{Analyzer, BlobStore, Clock, DocumentExtractor, DocumentStore, Notifier};

pub use self::analysis::AiAnalysisProcessor;
pub use self::document::DocumentProcessingProcessor;
pub use self::form::{FormCalculator, FormGenerationProcessor};
pub use self::notification::NotificationProcessor;
pub use self::registry::{ProcessorRegistry, RegistryError};

/// Executes one task type.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Cheap structural check, run before `process`. A `false` here is never retried.
    fn validate_payload(&self, payload: &Document) -> bool;

    async fn process(&self, task: &Task) -> Result<Document, ProcessorError>;
}

/// A processor whose payload decodes into `Self::Payload`.
///
/// ```ignore
/// struct Ping;
///
/// #[async_trait]
/// impl PayloadProcessor for Ping {
///     type Payload = PingPayload;
///     const TASK_TYPE: TaskType = TaskType::Notification;
///     const REQUIRED_FIELDS: &'static [&'static str] = &["target"];
///
///     async fn handle(&self, task: &Task, payload: PingPayload) -> Result<Document, ProcessorError> {
///         ...
///     }
/// }
///
/// registry.register(Arc::new(Typed(Ping)))?;
/// ```
#[async_trait]
pub trait PayloadProcessor: Send + Sync {
    type Payload: DeserializeOwned + Send;

    const TASK_TYPE: TaskType;

    /// Keys that must be present in the payload (any value, `null` included).
    const REQUIRED_FIELDS: &'static [&'static str];

    async fn handle(&self, task: &Task, payload: Self::Payload) -> Result<Document, ProcessorError>;
}

/// Type-erasing adapter: `Typed<P>` is a `TaskProcessor` for any `PayloadProcessor`.
pub struct Typed<P>(pub P);

impl<P> Typed<P> {
    pub fn inner(&self) -> &P {
        &self.0
    }
}

#[async_trait]
impl<P: PayloadProcessor> TaskProcessor for Typed<P> {
    fn task_type(&self) -> TaskType {
        P::TASK_TYPE
    }

    fn validate_payload(&self, payload: &Document) -> bool {
        missing_fields(payload, P::REQUIRED_FIELDS).is_empty()
    }

    async fn process(&self, task: &Task) -> Result<Document, ProcessorError> {
        let payload = decode_payload::<P::Payload>(P::TASK_TYPE, &task.payload, P::REQUIRED_FIELDS)?;
        self.0.handle(task, payload).await
    }
}

/// Required keys absent from `payload`, in declaration order.
pub fn missing_fields<'a>(payload: &Document, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|field| !payload.contains_key(*field))
        .collect()
}

/// Required-key check, then serde decode into `T`.
pub fn decode_payload<T: DeserializeOwned>(
    task_type: TaskType,
    payload: &Document,
    required: &[&str],
) -> Result<T, ProcessorError> {
    let missing = missing_fields(payload, required);
    if !missing.is_empty() {
        return Err(ProcessorError::invalid_payload(
            task_type,
            format!("missing {}", missing.join(", ")),
        ));
    }
    serde_json::from_value(serde_json::Value::Object(payload.clone()))
        .map_err(|e| ProcessorError::invalid_payload(task_type, e.to_string()))
}

/// Collaborators shared by the built-in processors.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub analyzer: Arc<dyn Analyzer>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Build a `Document` from a `json!` object literal.
pub(crate) fn object(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct EchoPayload {
        text: String,
    }

    struct Echo;

    #[async_trait]
    impl PayloadProcessor for Echo {
        type Payload = EchoPayload;
        const TASK_TYPE: TaskType = TaskType::Backup;
        const REQUIRED_FIELDS: &'static [&'static str] = &["text"];

        async fn handle(&self, _task: &Task, payload: EchoPayload) -> Result<Document, ProcessorError> {
            Ok(object(json!({ "echo": payload.text })))
        }
    }

    #[tokio::test]
    async fn typed_processor_decodes_payload() {
        let p = Typed(Echo);
        assert_eq!(p.task_type(), TaskType::Backup);

        let task = testing::task(TaskType::Backup, json!({ "text": "hi" }));
        assert!(p.validate_payload(&task.payload));
        let out = p.process(&task).await.unwrap();
        assert_eq!(out["echo"], json!("hi"));
    }

    #[tokio::test]
    async fn wrong_shapes_are_invalid_payloads() {
        let p = Typed(Echo);

        let task = testing::task(TaskType::Backup, json!({}));
        assert!(!p.validate_payload(&task.payload));
        let err = p.process(&task).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid payload for backup task: missing text");

        let task = testing::task(TaskType::Backup, json!({ "text": 42 }));
        assert!(p.validate_payload(&task.payload));
        let err = p.process(&task).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_fields_keeps_declaration_order() {
        let payload = object(json!({ "b": null }));
        assert_eq!(missing_fields(&payload, &["a", "b", "c"]), vec!["a", "c"]);
    }
}
