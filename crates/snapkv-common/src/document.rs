//! Document-store client abstraction
//!
//! The remote backends for the metadata store, the entry store, and the
//! queue all target the same kind of document database: keyed JSON
//! records with conditional writes on a per-record counter and ordered
//! range queries over a secondary sort key. This module defines that
//! client surface and an in-memory reference implementation.
//!
//! Real deployments plug a network client in behind [`DocumentStore`];
//! wiring one up is a deployment concern, not part of the core.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stored document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key, unique per table
    pub key: String,
    /// Optional secondary sort key for ordered prefix queries
    pub sort_key: Option<String>,
    /// Monotonically increasing counter used for conditional writes
    pub ver: u64,
    /// Record payload
    pub body: serde_json::Value,
}

impl Document {
    /// Create a fresh document with counter zero.
    #[must_use]
    pub fn new(key: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            sort_key: None,
            ver: 0,
            body,
        }
    }

    /// Set the secondary sort key
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

/// Client surface of a document database with optimistic concurrency
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by primary key.
    async fn get(&self, table: &str, key: &str) -> Result<Option<Document>>;

    /// Write a document conditionally.
    ///
    /// `expected = None` inserts and fails with `Conflict` if the key
    /// already exists. `expected = Some(v)` requires the stored counter
    /// to equal `v` and fails with `Conflict` otherwise. On success the
    /// stored counter becomes `v + 1` (or `1` for inserts) and is
    /// returned.
    async fn put(&self, table: &str, doc: Document, expected: Option<u64>) -> Result<u64>;

    /// Write a document unconditionally (last write wins), bumping the
    /// stored counter. Returns the new counter.
    async fn upsert(&self, table: &str, doc: Document) -> Result<u64>;

    /// Return documents whose sort key starts with `prefix`, ordered by
    /// sort key, at most `limit` of them.
    async fn query_sorted(&self, table: &str, prefix: &str, limit: usize) -> Result<Vec<Document>>;

    /// Return every document in a table, unordered.
    async fn scan(&self, table: &str) -> Result<Vec<Document>>;
}

/// In-memory reference implementation
///
/// Tables spring into existence on first write. Safe for concurrent use;
/// the conditional-write contract is identical to a remote backend's.
#[derive(Default)]
pub struct MemoryDocumentStore {
    tables: RwLock<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Document>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    async fn put(&self, table: &str, mut doc: Document, expected: Option<u64>) -> Result<u64> {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        let current = table.get(&doc.key).map(|d| d.ver);
        match (expected, current) {
            (None, None) => {
                doc.ver = 1;
            }
            (Some(v), Some(stored)) if v == stored => {
                doc.ver = stored + 1;
            }
            _ => {
                return Err(Error::Conflict {
                    entity: "document",
                    id: doc.key,
                });
            }
        }
        let ver = doc.ver;
        table.insert(doc.key.clone(), doc);
        Ok(ver)
    }

    async fn upsert(&self, table: &str, mut doc: Document) -> Result<u64> {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        doc.ver = table.get(&doc.key).map_or(0, |d| d.ver) + 1;
        let ver = doc.ver;
        table.insert(doc.key.clone(), doc);
        Ok(ver)
    }

    async fn query_sorted(&self, table: &str, prefix: &str, limit: usize) -> Result<Vec<Document>> {
        let tables = self.tables.read();
        let mut docs: Vec<Document> = tables
            .get(table)
            .map(|t| {
                t.values()
                    .filter(|d| d.sort_key.as_deref().is_some_and(|sk| sk.starts_with(prefix)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.key.cmp(&b.key)));
        docs.truncate(limit);
        Ok(docs)
    }

    async fn scan(&self, table: &str) -> Result<Vec<Document>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }
}
