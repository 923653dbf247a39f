//! Document processing: download an uploaded file, extract metadata/text,
//! and record the outcome on the `taxDocuments` record and the owning user.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::domain::{Document, ProcessorError, Task, TaskType, timestamp};
use crate::ports::{BlobStore, Clock, DocumentExtractor, DocumentStore, Extraction, Precondition};

use super::{PayloadProcessor, ProcessorContext, object};

pub const DOCUMENTS_COLLECTION: &str = "taxDocuments";
pub const USERS_COLLECTION: &str = "users";
const PROCESSOR_NAME: &str = "DocumentProcessingProcessor";

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPayload {
    pub document_id: String,
    pub document_url: String,
    /// MIME type of the upload.
    pub document_type: String,
    #[serde(default)]
    pub document_name: Option<String>,
}

pub struct DocumentProcessingProcessor {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn DocumentExtractor>,
    clock: Arc<dyn Clock>,
}

impl DocumentProcessingProcessor {
    pub fn new(ctx: &ProcessorContext) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            blobs: Arc::clone(&ctx.blobs),
            extractor: Arc::clone(&ctx.extractor),
            clock: Arc::clone(&ctx.clock),
        }
    }

    async fn run(&self, task: &Task, payload: &DocumentPayload) -> Result<Document, ProcessorError> {
        let blob_path = blob_path(&payload.document_url)?;

        let suffix = payload
            .document_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        // removed on drop, including on the error paths below
        let scratch = tempfile::Builder::new()
            .prefix("taxfront-")
            .suffix(&suffix)
            .tempfile()?;
        self.blobs.download_to(&blob_path, scratch.path()).await?;

        let extraction = match payload.document_type.as_str() {
            "application/pdf" => self.extractor.extract_pdf(scratch.path()).await?,
            mime if mime.starts_with("image/") => self.extractor.extract_image(scratch.path()).await?,
            other => {
                warn!(document_id = %payload.document_id, mime = %other, "unsupported document type");
                Extraction::default()
            }
        };
        drop(scratch);

        let now = timestamp::to_value(&self.clock.now());
        let text_length = extraction.text.chars().count();
        let update = object(json!({
            "status": "processed",
            "metadata": extraction.metadata,
            "extractedText": extraction.text,
            "processedAt": now,
            "processingDetails": {
                "success": true,
                "timestamp": now,
                "processor": PROCESSOR_NAME,
            },
        }));
        self.store
            .update(DOCUMENTS_COLLECTION, &payload.document_id, update, Precondition::None)
            .await?;

        self.store
            .merge(
                USERS_COLLECTION,
                &task.user_id,
                object(json!({ "lastProcessedAt": now })),
            )
            .await?;
        self.store
            .increment(USERS_COLLECTION, &task.user_id, "documentCount", 1)
            .await?;

        info!(task_id = %task.id, document_id = %payload.document_id, text_length, "document processed");
        Ok(object(json!({
            "document_id": payload.document_id,
            "metadata": extraction.metadata,
            "text_length": text_length,
            "success": true,
        })))
    }

    /// Best effort: the original error is what the caller sees.
    async fn mark_error(&self, document_id: &str, err: &ProcessorError) {
        let fields = object(json!({
            "status": "error",
            "error": err.to_string(),
            "processedAt": timestamp::to_value(&self.clock.now()),
        }));
        if let Err(e) = self
            .store
            .update(DOCUMENTS_COLLECTION, document_id, fields, Precondition::None)
            .await
        {
            warn!(%document_id, error = %e, "could not record document error");
        }
    }
}

#[async_trait]
impl PayloadProcessor for DocumentProcessingProcessor {
    type Payload = DocumentPayload;
    const TASK_TYPE: TaskType = TaskType::DocumentProcessing;
    const REQUIRED_FIELDS: &'static [&'static str] = &["document_id", "document_url", "document_type"];

    async fn handle(&self, task: &Task, payload: DocumentPayload) -> Result<Document, ProcessorError> {
        info!(
            task_id = %task.id,
            document_id = %payload.document_id,
            mime = %payload.document_type,
            "processing document"
        );
        match self.run(task, &payload).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(task_id = %task.id, document_id = %payload.document_id, error = %err, "document processing failed");
                self.mark_error(&payload.document_id, &err).await;
                Err(err)
            }
        }
    }
}

/// Bucket-relative object path for a storage URL.
///
/// - `gs://bucket/users/u1/w2.pdf` → `users/u1/w2.pdf`
/// - `https://storage.googleapis.com/bucket/users/u1/w2.pdf` → `users/u1/w2.pdf`
///
/// `gs://` paths are taken verbatim; http(s) segments are percent-decoded.
pub fn blob_path(document_url: &str) -> Result<String, ProcessorError> {
    let invalid = || ProcessorError::InvalidUrl(document_url.to_string());
    let url = Url::parse(document_url).map_err(|_| invalid())?;

    let path = match url.scheme() {
        // object names are stored verbatim, so take the raw text after the bucket
        "gs" => document_url
            .splitn(4, '/')
            .nth(3)
            .unwrap_or_default()
            .to_string(),
        "http" | "https" => {
            let mut segments = url.path_segments().ok_or_else(invalid)?;
            segments.next(); // bucket
            segments
                .map(|seg| percent_decode_str(seg).decode_utf8().map_err(|_| invalid()))
                .collect::<Result<Vec<_>, _>>()?
                .join("/")
        }
        _ => return Err(invalid()),
    };
    if path.is_empty() {
        return Err(invalid());
    }
    Ok(path)
}
