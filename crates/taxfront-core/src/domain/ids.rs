//! Domain identifiers.
//!
//! Task ids are generated as ULID text by [`crate::ports::IdGenerator`], but the
//! persisted layout treats them as opaque strings. Records written by other
//! producers (e.g. UUID v4 ids) load without conversion.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task record (the document id in every partition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::new("0b7e2c1e-5f0e-4a53-9d8e-2b1d0c7e9a11");
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "\"0b7e2c1e-5f0e-4a53-9d8e-2b1d0c7e9a11\"");

        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_is_the_raw_value() {
        let id = TaskId::from("01HZX3");
        assert_eq!(id.to_string(), "01HZX3");
        assert_eq!(id.as_str(), "01HZX3");
    }
}
