//! Document-store contract. The pipeline core is written against this
//! trait; the backing implementation (in-memory here, a hosted document
//! database in production) only has to honor these semantics:
//!
//! - `replace` is optimistic-concurrency guarded: a stale etag yields a
//!   `Conflict` error, never a silent overwrite.
//! - `query` may be cross-partition and gives no ordering guarantee;
//!   callers sort in application memory.
//! - `change_stream` is at-least-once with lease-based checkpointing:
//!   requesting delivery *n+1* commits the checkpoint for delivery *n*,
//!   so a crashed consumer re-reads its last in-flight document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use newsreel_common::NewsreelError;

/// Opaque optimistic-concurrency token issued by the store on every write.
pub type Etag = String;

/// A small typed predicate set instead of a query-language string. Matching
/// is conjunctive across all populated fields.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Top-level field equals the given JSON value.
    pub equals: Vec<(String, Value)>,
    /// Top-level field is present and non-null.
    pub exists: Vec<String>,
    /// RFC 3339 timestamp field is at or after the bound.
    pub min_timestamp: Option<(String, DateTime<Utc>)>,
    /// RFC 3339 timestamp field is strictly before the bound.
    pub max_timestamp: Option<(String, DateTime<Utc>)>,
    /// Bound on result size, applied after filtering.
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn field_equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    pub fn field_exists(mut self, field: &str) -> Self {
        self.exists.push(field.to_string());
        self
    }

    pub fn updated_since(mut self, field: &str, bound: DateTime<Utc>) -> Self {
        self.min_timestamp = Some((field.to_string(), bound));
        self
    }

    pub fn older_than(mut self, field: &str, bound: DateTime<Utc>) -> Self {
        self.max_timestamp = Some((field.to_string(), bound));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `doc` satisfies every populated predicate.
    pub fn matches(&self, doc: &Value) -> bool {
        for (field, expected) in &self.equals {
            if doc.get(field) != Some(expected) {
                return false;
            }
        }
        for field in &self.exists {
            match doc.get(field) {
                Some(Value::Null) | None => return false,
                Some(_) => {}
            }
        }
        if let Some((field, bound)) = &self.min_timestamp {
            match timestamp_field(doc, field) {
                Some(ts) if ts >= *bound => {}
                _ => return false,
            }
        }
        if let Some((field, bound)) = &self.max_timestamp {
            match timestamp_field(doc, field) {
                Some(ts) if ts < *bound => {}
                _ => return false,
            }
        }
        true
    }
}

fn timestamp_field(doc: &Value, field: &str) -> Option<DateTime<Utc>> {
    doc.get(field)?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or overwrite unconditionally. Returns the new etag.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
        partition_key: &str,
    ) -> Result<Etag, NewsreelError>;

    /// Read one document. `NotFound` if absent.
    async fn read(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<(Value, Etag), NewsreelError>;

    /// Replace guarded by etag. `Conflict` on mismatch.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
        partition_key: &str,
        if_match: &Etag,
    ) -> Result<Etag, NewsreelError>;

    /// Delete if present. Absent is not an error (TTL sweeps race).
    async fn delete(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<(), NewsreelError>;

    /// Cross-partition filtered scan. No ordering guarantee.
    async fn query(
        &self,
        collection: &str,
        filter: QueryFilter,
    ) -> Result<Vec<Value>, NewsreelError>;

    /// Open (or resume) a named change-stream lease over a collection.
    async fn change_stream(
        &self,
        collection: &str,
        lease_name: &str,
    ) -> Result<Box<dyn ChangeStream>, NewsreelError>;
}

/// An at-least-once, lease-checkpointed feed of document mutations.
#[async_trait]
pub trait ChangeStream: Send {
    /// Wait for and return the next changed document. Commits the
    /// checkpoint for the previous delivery first, so re-delivery after a
    /// crash covers exactly the in-flight document.
    async fn next(&mut self) -> Result<Value, NewsreelError>;

    /// Commit through the last delivered document without requesting
    /// another. Called on clean shutdown so a replica resumes precisely.
    async fn checkpoint(&mut self) -> Result<(), NewsreelError>;
}
