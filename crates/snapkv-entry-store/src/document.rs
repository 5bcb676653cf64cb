//! Document-store entry backend
//!
//! Entries are single documents keyed by the joined composite key. The
//! components are web-safe strings, so `/` is a collision-free
//! separator. Value bytes live base64-encoded inside the JSON body.

use crate::store::{check_batch, EntryRef, EntryStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::json;
use snapkv_common::document::{Document, DocumentStore};
use snapkv_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Entry store on top of a document database
pub struct DocumentEntryStore {
    client: Arc<dyn DocumentStore>,
    table: String,
}

impl DocumentEntryStore {
    pub fn new(client: Arc<dyn DocumentStore>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn doc_key(key: &EntryRef) -> String {
        format!("{}/{}/{}/{}", key.dataset, key.version, key.table, key.key)
    }

    fn decode(doc: &Document) -> Result<Bytes> {
        let encoded = doc.body["value"]
            .as_str()
            .ok_or_else(|| Error::internal(format!("corrupt entry record {}", doc.key)))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| Error::internal(format!("corrupt entry record {}: {e}", doc.key)))?;
        Ok(Bytes::from(raw))
    }
}

#[async_trait]
impl EntryStore for DocumentEntryStore {
    async fn put_one(&self, key: EntryRef, value: Bytes) -> Result<()> {
        let doc = Document::new(Self::doc_key(&key), json!({"value": BASE64.encode(&value)}));
        self.client.upsert(&self.table, doc).await?;
        Ok(())
    }

    async fn get_one(&self, key: &EntryRef) -> Result<Option<Bytes>> {
        match self.client.get(&self.table, &Self::doc_key(key)).await? {
            Some(doc) => Ok(Some(Self::decode(&doc)?)),
            None => Ok(None),
        }
    }

    async fn put_many(&self, entries: Vec<(EntryRef, Bytes)>) -> Result<()> {
        check_batch(entries.len())?;
        debug!(count = entries.len(), "writing entry batch");
        for (key, value) in entries {
            self.put_one(key, value).await?;
        }
        Ok(())
    }

    async fn get_many(&self, keys: Vec<EntryRef>) -> Result<HashMap<EntryRef, Option<Bytes>>> {
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.get_one(&key).await?;
            result.insert(key, value);
        }
        Ok(result)
    }
}
