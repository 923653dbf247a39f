//! Queue and worker configuration.
//!
//! Defaults match the collections and timings the production backend uses.
//! `from_env()` reads `TAXFRONT_*` variables; unset variables keep the default,
//! malformed ones are a `ConfigError`.

use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskType;
use crate::queue::RetryPolicy;

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Collection names for the four task partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub pending: String,
    pub processing: String,
    pub completed: String,
    pub failed: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            pending: "task_queue".to_string(),
            processing: "task_processing".to_string(),
            completed: "task_completed".to_string(),
            failed: "task_failed".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub collections: Collections,
    /// Page size for cleanup deletes; one batch commit per page.
    pub cleanup_batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            collections: Collections::default(),
            cleanup_batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let c = &mut config.collections;
        for (var, slot) in [
            ("TAXFRONT_COLLECTION_PENDING", &mut c.pending),
            ("TAXFRONT_COLLECTION_PROCESSING", &mut c.processing),
            ("TAXFRONT_COLLECTION_COMPLETED", &mut c.completed),
            ("TAXFRONT_COLLECTION_FAILED", &mut c.failed),
        ] {
            if let Some(name) = lookup(var) {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::Empty { var });
                }
                *slot = name.to_string();
            }
        }

        if let Some(n) = parse::<usize>(&lookup, "TAXFRONT_CLEANUP_BATCH_SIZE", "positive integer")? {
            config.cleanup_batch_size = positive(n, "TAXFRONT_CLEANUP_BATCH_SIZE")?;
        }
        if let Some(secs) = parse::<u64>(&lookup, "TAXFRONT_RETRY_BASE_SECONDS", "number of seconds")? {
            config.retry.base_delay = Duration::from_secs(secs);
        }
        if let Some(m) = parse::<f64>(&lookup, "TAXFRONT_RETRY_MULTIPLIER", "multiplier")? {
            if !(m.is_finite() && m >= 1.0) {
                return Err(ConfigError::Invalid {
                    var: "TAXFRONT_RETRY_MULTIPLIER",
                    expected: "multiplier",
                    value: m.to_string(),
                });
            }
            config.retry.multiplier = m;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Sleep between polls when nothing is claimable.
    pub poll_interval: Duration,
    /// Restrict claims to these types; `None` takes anything.
    pub task_types: Option<Vec<TaskType>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            task_types: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(n) = parse::<usize>(&lookup, "TAXFRONT_WORKER_CONCURRENCY", "positive integer")? {
            config.concurrency = positive(n, "TAXFRONT_WORKER_CONCURRENCY")?;
        }
        if let Some(ms) = parse::<u64>(&lookup, "TAXFRONT_POLL_INTERVAL_MS", "number of milliseconds")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("TAXFRONT_TASK_TYPES") {
            config.task_types = parse_task_types(&raw)?;
        }
        Ok(config)
    }
}

/// Comma-separated task type list; an empty list means "any type".
pub fn parse_task_types(raw: &str) -> Result<Option<Vec<TaskType>>> {
    let types = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<TaskType>().map_err(|_| ConfigError::Invalid {
                var: "TAXFRONT_TASK_TYPES",
                expected: "task type",
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((!types.is_empty()).then_some(types))
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        })
}

fn positive(n: usize, var: &'static str) -> Result<usize> {
    if n == 0 {
        return Err(ConfigError::Invalid {
            var,
            expected: "positive integer",
            value: "0".to_string(),
        });
    }
    Ok(n)
}
