//! InMemoryDocumentStore - development/test document store.
//!
//! # Details
//! - One `BTreeMap<id, Document>` per collection behind a single `tokio::sync::Mutex`
//! - Every operation holds the lock for its whole duration, so `update`
//!   preconditions and `increment` are atomic
//! - `set_offline(true)` makes every call fail with `StoreError::Unavailable`

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{Document, StoreError};
use crate::ports::{DocumentStore, Precondition, Query, Snapshot};

type Collection = BTreeMap<String, Document>;

/// Every collection's documents, by collection name then id.
pub type StoreSnapshot = BTreeMap<String, BTreeMap<String, Document>>;

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Collection>>,
    offline: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled from `snapshot()` output.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            collections: Mutex::new(snapshot.into_iter().collect()),
            offline: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let collections = self.collections.lock().await;
        collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, docs)| (name.clone(), docs.clone()))
            .collect()
    }

    /// Simulate an outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        let collections = self.collections.lock().await;
        collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub async fn contains(&self, collection: &str, id: &str) -> bool {
        let collections = self.collections.lock().await;
        collections
            .get(collection)
            .is_some_and(|c| c.contains_key(id))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        doc.extend(fields);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_online()?;
        let collections = self.collections.lock().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        let Some(doc) = collections.get_mut(collection).and_then(|c| c.get_mut(id)) else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        if !precondition.holds(doc) {
            return Err(StoreError::PreconditionFailed {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        doc.extend(fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        if let Some(c) = collections.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        self.check_online()?;
        let collections = self.collections.lock().await;
        let Some(c) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<Snapshot> = c
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, doc)| Snapshot {
                id: id.clone(),
                data: doc.clone(),
            })
            .collect();
        // stable sort: ties keep id order
        hits.sort_by(|a, b| query.compare(&a.data, &b.data));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn batch_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        if let Some(c) = collections.get_mut(collection) {
            for id in ids {
                c.remove(id);
            }
        }
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut collections = self.collections.lock().await;
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        let current = match doc.get(field) {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                StoreError::Encoding(format!("{collection}/{id}.{field} is not an integer"))
            })?,
            Some(other) => {
                return Err(StoreError::Encoding(format!(
                    "cannot increment {collection}/{id}.{field}: {other}"
                )));
            }
        };
        doc.insert(field.to_string(), Value::from(current + delta));
        Ok(())
    }
}
