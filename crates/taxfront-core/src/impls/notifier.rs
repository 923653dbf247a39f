//! LogNotifier - writes deliveries to the log instead of a provider.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::domain::ProcessorError;
use crate::ports::{Delivery, Notifier};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

fn delivered(channel: &str, idempotency_key: &str) -> Delivery {
    Delivery {
        message_id: format!("{channel}_{idempotency_key}"),
        status: "sent".to_string(),
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(
        &self,
        recipient: &str,
        message: &Value,
        idempotency_key: &str,
    ) -> Result<Delivery, ProcessorError> {
        info!(%recipient, key = %idempotency_key, %message, "email sent");
        Ok(delivered("email", idempotency_key))
    }

    async fn send_push(
        &self,
        recipient: &str,
        message: &Value,
        idempotency_key: &str,
    ) -> Result<Delivery, ProcessorError> {
        info!(%recipient, key = %idempotency_key, %message, "push notification sent");
        Ok(delivered("push", idempotency_key))
    }
}
