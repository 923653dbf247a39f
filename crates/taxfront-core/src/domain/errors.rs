//! Error types shared across the crate.
//!
//! Classification follows how the worker routes failures:
//! - validation problems (`InvalidPayload`, `Unsupported`, `InvalidUrl`) are never retried
//! - everything else a processor raises goes through bounded retry
//! - store errors propagate to the caller of a queue operation

use thiserror::Error;

use super::task::TaskType;

/// Failure to parse a closed enum from its persisted/textual form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Errors reported by a `DocumentStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("precondition failed for {collection}/{id}")]
    PreconditionFailed { collection: String, id: String },

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document encoding: {0}")]
    Encoding(String),
}

/// Errors reported by a `BlobStore` implementation.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by `TaskQueue` operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot decode task {collection}/{id}: {source}")]
    Decode {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode task {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by task processors.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("invalid payload for {task_type} task: {reason}")]
    InvalidPayload { task_type: TaskType, reason: String },

    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("invalid storage url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    External(String),
}

impl ProcessorError {
    pub fn invalid_payload(task_type: TaskType, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            task_type,
            reason: reason.into(),
        }
    }

    pub fn unsupported(what: &'static str, value: impl Into<String>) -> Self {
        Self::Unsupported {
            what,
            value: value.into(),
        }
    }

    /// Is another attempt worth scheduling?
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProcessorError::InvalidPayload { .. }
                | ProcessorError::Unsupported { .. }
                | ProcessorError::InvalidUrl(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::payload(ProcessorError::invalid_payload(TaskType::Notification, "missing recipient"), false)]
    #[case::unsupported(ProcessorError::unsupported("form type", "FORM_9999"), false)]
    #[case::url(ProcessorError::InvalidUrl("ftp://x".into()), false)]
    #[case::store(ProcessorError::Store(StoreError::Unavailable("timeout".into())), true)]
    #[case::external(ProcessorError::External("smtp down".into()), true)]
    fn retry_classification(#[case] err: ProcessorError, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn messages_name_the_offending_value() {
        let err = ProcessorError::unsupported("analysis type", "horoscope");
        assert_eq!(err.to_string(), "unsupported analysis type: horoscope");

        let err = ProcessorError::invalid_payload(TaskType::FormGeneration, "missing tax_year");
        assert_eq!(
            err.to_string(),
            "invalid payload for form_generation task: missing tax_year"
        );
    }
}
