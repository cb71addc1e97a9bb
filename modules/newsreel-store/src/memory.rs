//! In-process `DocumentStore` backed by per-collection commit logs. Used
//! by the test suite and by single-process (`all`) mode; it implements the
//! full contract including etag conflicts and lease-checkpointed change
//! streams, so components exercise the same code paths as against a hosted
//! document database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use newsreel_common::NewsreelError;

use crate::store::{ChangeStream, DocumentStore, Etag, QueryFilter};

#[derive(Debug, Clone)]
struct StoredDoc {
    value: Value,
    etag: u64,
    partition_key: String,
}

#[derive(Default)]
struct Collection {
    docs: HashMap<String, StoredDoc>,
    /// Append-only log of committed document snapshots, the change-stream
    /// source of truth.
    log: Vec<Value>,
    /// Committed offset per lease name.
    leases: HashMap<String, usize>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    etag_counter: u64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents currently in a collection, unordered. Test helper.
    pub fn dump(&self, collection: &str) -> Vec<Value> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .collections
            .get(collection)
            .map(|c| c.docs.values().map(|d| d.value.clone()).collect())
            .unwrap_or_default()
    }
}

/// Stamp the stored document with its server-issued etag, the way hosted
/// document stores surface `_etag` on every read.
fn stamp_etag(doc: &mut Value, etag: u64) -> Etag {
    let etag_str = format!("{etag:x}");
    if let Value::Object(map) = doc {
        map.insert("etag".to_string(), Value::String(etag_str.clone()));
    }
    etag_str
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        mut doc: Value,
        partition_key: &str,
    ) -> Result<Etag, NewsreelError> {
        let etag = {
            let mut inner = self.inner.lock().expect("store lock");
            inner.etag_counter += 1;
            let counter = inner.etag_counter;
            let etag = stamp_etag(&mut doc, counter);
            let coll = inner.collections.entry(collection.to_string()).or_default();
            coll.docs.insert(
                id.to_string(),
                StoredDoc {
                    value: doc.clone(),
                    etag: counter,
                    partition_key: partition_key.to_string(),
                },
            );
            coll.log.push(doc);
            etag
        };
        self.appended.notify_waiters();
        Ok(etag)
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        _partition_key: &str,
    ) -> Result<(Value, Etag), NewsreelError> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .map(|d| (d.value.clone(), format!("{:x}", d.etag)))
            .ok_or_else(|| NewsreelError::not_found(collection, id))
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        mut doc: Value,
        partition_key: &str,
        if_match: &Etag,
    ) -> Result<Etag, NewsreelError> {
        let etag = {
            let mut inner = self.inner.lock().expect("store lock");
            inner.etag_counter += 1;
            let counter = inner.etag_counter;
            let coll = inner
                .collections
                .get_mut(collection)
                .ok_or_else(|| NewsreelError::not_found(collection, id))?;
            let existing = coll
                .docs
                .get_mut(id)
                .ok_or_else(|| NewsreelError::not_found(collection, id))?;
            if format!("{:x}", existing.etag) != *if_match {
                return Err(NewsreelError::conflict(collection, id));
            }
            let etag = stamp_etag(&mut doc, counter);
            *existing = StoredDoc {
                value: doc.clone(),
                etag: counter,
                partition_key: partition_key.to_string(),
            };
            coll.log.push(doc);
            etag
        };
        self.appended.notify_waiters();
        Ok(etag)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        _partition_key: &str,
    ) -> Result<(), NewsreelError> {
        let mut inner = self.inner.lock().expect("store lock");
        if let Some(coll) = inner.collections.get_mut(collection) {
            coll.docs.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: QueryFilter,
    ) -> Result<Vec<Value>, NewsreelError> {
        let inner = self.inner.lock().expect("store lock");
        let Some(coll) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Value> = coll
            .docs
            .values()
            .filter(|d| filter.matches(&d.value))
            .map(|d| d.value.clone())
            .collect();
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn change_stream(
        &self,
        collection: &str,
        lease_name: &str,
    ) -> Result<Box<dyn ChangeStream>, NewsreelError> {
        let offset = {
            let mut inner = self.inner.lock().expect("store lock");
            let coll = inner.collections.entry(collection.to_string()).or_default();
            *coll.leases.entry(lease_name.to_string()).or_insert(0)
        };
        Ok(Box::new(MemoryChangeStream {
            store: self.clone(),
            collection: collection.to_string(),
            lease_name: lease_name.to_string(),
            next_offset: offset,
            delivered: offset,
        }))
    }
}

struct MemoryChangeStream {
    store: MemoryStore,
    collection: String,
    lease_name: String,
    /// Offset of the next log entry to deliver.
    next_offset: usize,
    /// Offset up to which deliveries are complete (committed on the
    /// following `next` or an explicit `checkpoint`).
    delivered: usize,
}

impl MemoryChangeStream {
    fn commit(&self, through: usize) {
        let mut inner = self.store.inner.lock().expect("store lock");
        if let Some(coll) = inner.collections.get_mut(&self.collection) {
            coll.leases.insert(self.lease_name.clone(), through);
        }
    }

    fn try_take(&mut self) -> Option<Value> {
        let doc = {
            let inner = self.store.inner.lock().expect("store lock");
            let coll = inner.collections.get(&self.collection)?;
            coll.log.get(self.next_offset)?.clone()
        };
        self.next_offset += 1;
        Some(doc)
    }
}

#[async_trait]
impl ChangeStream for MemoryChangeStream {
    async fn next(&mut self) -> Result<Value, NewsreelError> {
        // The previous delivery is now handled; commit its offset.
        if self.delivered < self.next_offset {
            self.commit(self.next_offset);
            self.delivered = self.next_offset;
        }
        loop {
            if let Some(doc) = self.try_take() {
                return Ok(doc);
            }
            let notify = self.store.appended.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // An append may have landed between the check and registration.
            if let Some(doc) = self.try_take() {
                return Ok(doc);
            }
            notified.await;
        }
    }

    async fn checkpoint(&mut self) -> Result<(), NewsreelError> {
        if self.delivered < self.next_offset {
            self.commit(self.next_offset);
            self.delivered = self.next_offset;
        }
        Ok(())
    }
}
