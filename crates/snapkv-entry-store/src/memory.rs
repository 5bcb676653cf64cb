//! In-memory entry store

use crate::store::{check_batch, EntryRef, EntryStore};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use snapkv_common::Result;
use std::collections::HashMap;

/// In-memory entry store
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<HashMap<EntryRef, Bytes>>,
}

impl MemoryEntryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, across all datasets and versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn put_one(&self, key: EntryRef, value: Bytes) -> Result<()> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    async fn get_one(&self, key: &EntryRef) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put_many(&self, entries: Vec<(EntryRef, Bytes)>) -> Result<()> {
        check_batch(entries.len())?;
        let mut stored = self.entries.write();
        for (key, value) in entries {
            stored.insert(key, value);
        }
        Ok(())
    }

    async fn get_many(&self, keys: Vec<EntryRef>) -> Result<HashMap<EntryRef, Option<Bytes>>> {
        let stored = self.entries.read();
        Ok(keys
            .into_iter()
            .map(|key| {
                let value = stored.get(&key).cloned();
                (key, value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapkv_common::types::{DatasetName, EntryKey, TableName, VersionId};

    fn entry_ref(version: VersionId, key: &str) -> EntryRef {
        EntryRef {
            dataset: DatasetName::new_unchecked("recs"),
            version,
            table: TableName::new_unchecked("items"),
            key: EntryKey::new_unchecked(key),
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryEntryStore::new();
        let version = VersionId::new();
        store
            .put_one(entry_ref(version, "k1"), Bytes::from_static(b"v1"))
            .await
            .unwrap();
        assert_eq!(
            store.get_one(&entry_ref(version, "k1")).await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
        assert_eq!(store.get_one(&entry_ref(version, "k2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_last_write_wins() {
        let store = MemoryEntryStore::new();
        let version = VersionId::new();
        store
            .put_one(entry_ref(version, "k1"), Bytes::from_static(b"old"))
            .await
            .unwrap();
        store
            .put_one(entry_ref(version, "k1"), Bytes::from_static(b"new"))
            .await
            .unwrap();
        assert_eq!(
            store.get_one(&entry_ref(version, "k1")).await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_versions_are_isolated() {
        let store = MemoryEntryStore::new();
        let v1 = VersionId::new();
        let v2 = VersionId::new();
        store
            .put_one(entry_ref(v1, "k"), Bytes::from_static(b"v1val"))
            .await
            .unwrap();
        store
            .put_one(entry_ref(v2, "k"), Bytes::from_static(b"v2val"))
            .await
            .unwrap();
        assert_eq!(
            store.get_one(&entry_ref(v1, "k")).await.unwrap(),
            Some(Bytes::from_static(b"v1val"))
        );
        assert_eq!(
            store.get_one(&entry_ref(v2, "k")).await.unwrap(),
            Some(Bytes::from_static(b"v2val"))
        );
    }

    #[tokio::test]
    async fn test_get_many_reports_every_key() {
        let store = MemoryEntryStore::new();
        let version = VersionId::new();
        store
            .put_many(vec![
                (entry_ref(version, "a"), Bytes::from_static(b"1")),
                (entry_ref(version, "b"), Bytes::from_static(b"2")),
            ])
            .await
            .unwrap();

        let result = store
            .get_many(vec![
                entry_ref(version, "a"),
                entry_ref(version, "b"),
                entry_ref(version, "missing"),
            ])
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[&entry_ref(version, "a")], Some(Bytes::from_static(b"1")));
        assert_eq!(result[&entry_ref(version, "missing")], None);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let store = MemoryEntryStore::new();
        let version = VersionId::new();
        assert!(store.put_many(vec![]).await.is_err());

        let at_limit: Vec<_> = (0..crate::store::MAX_BATCH)
            .map(|i| (entry_ref(version, &format!("k{i}")), Bytes::from_static(b"v")))
            .collect();
        store.put_many(at_limit).await.unwrap();

        let over: Vec<_> = (0..=crate::store::MAX_BATCH)
            .map(|i| (entry_ref(version, &format!("x{i}")), Bytes::from_static(b"v")))
            .collect();
        let err = store.put_many(over).await.unwrap_err();
        assert_eq!(err.kind(), "batch-too-large");
    }
}
