//! Notifier port - outbound email and push delivery.
//!
//! Every call carries an idempotency key (the task id). A retried task
//! reuses the same key, so a provider that honours it will not double-send.

use async_trait::async_trait;

use crate::domain::{Document, ProcessorError};

/// Provider acknowledgement for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub status: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(
        &self,
        recipient: &str,
        message: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<Delivery, ProcessorError>;

    async fn send_push(
        &self,
        recipient: &str,
        message: &serde_json::Value,
        idempotency_key: &str,
    ) -> Result<Delivery, ProcessorError>;
}

impl Delivery {
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("message_id".into(), self.message_id.clone().into());
        doc.insert("status".into(), self.status.clone().into());
        doc
    }
}
