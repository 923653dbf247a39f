//! Notifications: email and push go out through the `Notifier`;
//! in-app notifications are written to the `notifications` collection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{Document, ProcessorError, Task, TaskType, timestamp};
use crate::ports::{Clock, DocumentStore, Notifier};

use super::{PayloadProcessor, ProcessorContext, object};

pub const NOTIFICATIONS_COLLECTION: &str = "notifications";

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub notification_type: String,
    pub recipient: String,
    pub message: Value,
}

pub struct NotificationProcessor {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl NotificationProcessor {
    pub fn new(ctx: &ProcessorContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            notifier: Arc::clone(&ctx.notifier),
            clock: Arc::clone(&ctx.clock),
        }
    }

    async fn create_in_app(&self, task: &Task, payload: &NotificationPayload) -> Result<Document, ProcessorError> {
        let notification_id = task.id.as_str();
        let record = object(json!({
            "userId": payload.recipient,
            "message": payload.message,
            "createdAt": timestamp::to_value(&self.clock.now()),
            "read": false,
            "type": "in_app",
        }));
        self.store.set(NOTIFICATIONS_COLLECTION, notification_id, record).await?;
        Ok(object(json!({ "notification_id": notification_id, "status": "created" })))
    }
}

#[async_trait]
impl PayloadProcessor for NotificationProcessor {
    type Payload = NotificationPayload;
    const TASK_TYPE: TaskType = TaskType::Notification;
    const REQUIRED_FIELDS: &'static [&'static str] = &["notification_type", "recipient", "message"];

    async fn handle(&self, task: &Task, payload: NotificationPayload) -> Result<Document, ProcessorError> {
        // task id doubles as the provider idempotency key
        let key = task.id.as_str();
        let result = match payload.notification_type.as_str() {
            "email" => self
                .notifier
                .send_email(&payload.recipient, &payload.message, key)
                .await?
                .to_document(),
            "push" => self
                .notifier
                .send_push(&payload.recipient, &payload.message, key)
                .await?
                .to_document(),
            "in_app" => self.create_in_app(task, &payload).await?,
            other => return Err(ProcessorError::unsupported("notification type", other)),
        };

        info!(
            task_id = %task.id,
            notification_type = %payload.notification_type,
            recipient = %payload.recipient,
            "notification sent"
        );
        Ok(object(json!({
            "notification_type": payload.notification_type,
            "recipient": payload.recipient,
            "success": true,
            "result": result,
        })))
    }
}
