//! DocumentStore port - the source of truth for task records and domain records.
//!
//! The shape follows a Firestore-like document database: named collections of
//! JSON objects keyed by id, field filters, ordering and limits.
//!
//! # Contract
//! - `update` fails with `NotFound` when the document is absent, and with
//!   `PreconditionFailed` when the precondition does not hold. Check and write
//!   are one atomic step; the queue's single-claim guarantee depends on it.
//! - `delete` is idempotent.
//! - `batch_delete` commits all ids together.
//! - `increment` is applied server-side and creates the document/field if needed.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Document, StoreError};

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Field value equals one of the values in the filter's array.
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FieldOp,
    pub value: Value,
}

impl Filter {
    /// Does `doc` satisfy this filter?
    ///
    /// Missing fields, and values of a different JSON type than the operand,
    /// never match a range comparison.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            FieldOp::Eq => actual == &self.value,
            FieldOp::In => match &self.value {
                Value::Array(options) => options.iter().any(|v| v == actual),
                _ => false,
            },
            FieldOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FieldOp::Le => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FieldOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FieldOp::Ge => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Conjunctive field filters, ordering keys (applied in sequence) and an optional limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FieldOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FieldOp::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Ordering of two documents under this query's `order_by` keys.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.order_by {
            let ord = match (a.get(&key.field), b.get(&key.field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = match key.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Condition checked atomically with an `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Precondition {
    #[default]
    None,
    /// The stored value of `field` must equal one of `values`.
    FieldIn { field: String, values: Vec<Value> },
}

impl Precondition {
    pub fn field_in(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::FieldIn {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn holds(&self, doc: &Document) -> bool {
        match self {
            Precondition::None => true,
            Precondition::FieldIn { field, values } => doc
                .get(field)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
        }
    }
}

/// A document returned by a query, with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Document,
}

/// Order two JSON values of the same kind. Numbers compare numerically,
/// strings lexicographically (ISO-8601 timestamps sort in time order).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace a document.
    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Create the document or merge `fields` into it (top-level keys).
    async fn merge(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into an existing document if `precondition` holds.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        precondition: Precondition,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Atomically add `delta` to a numeric field.
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError>;
}
