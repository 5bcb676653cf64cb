//! Entry store contract

use async_trait::async_trait;
use bytes::Bytes;
use snapkv_common::types::{DatasetName, EntryKey, TableName, VersionId};
use snapkv_common::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Largest batch `put_many`/`get_many` accept.
pub const MAX_BATCH: usize = 1000;

/// Composite key of one entry
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntryRef {
    pub dataset: DatasetName,
    pub version: VersionId,
    pub table: TableName,
    pub key: EntryKey,
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntryRef({}/{}/{}/{})",
            self.dataset, self.version, self.table, self.key
        )
    }
}

/// Persistence contract for entries
///
/// Values are opaque bytes; the store never interprets them. `get_many`
/// returns a mapping that contains every requested key, with `None` for
/// misses, so callers can report hit/miss counts without re-deriving
/// them.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Upsert one entry.
    async fn put_one(&self, key: EntryRef, value: Bytes) -> Result<()>;

    /// Fetch one entry; `None` when absent.
    async fn get_one(&self, key: &EntryRef) -> Result<Option<Bytes>>;

    /// Upsert a batch of entries.
    ///
    /// # Errors
    /// `EmptyBatch` for zero entries, `BatchTooLarge` beyond
    /// [`MAX_BATCH`], `TooManyRequests` when the backend throttles.
    async fn put_many(&self, entries: Vec<(EntryRef, Bytes)>) -> Result<()>;

    /// Fetch a batch; the result holds every requested key.
    async fn get_many(&self, keys: Vec<EntryRef>) -> Result<HashMap<EntryRef, Option<Bytes>>>;
}

/// Shared batch-size check used by every implementation.
pub(crate) fn check_batch(len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::EmptyBatch);
    }
    if len > MAX_BATCH {
        return Err(Error::BatchTooLarge {
            got: len,
            limit: MAX_BATCH,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch_bounds() {
        assert!(check_batch(0).is_err());
        assert!(check_batch(1).is_ok());
        assert!(check_batch(MAX_BATCH).is_ok());
        let err = check_batch(MAX_BATCH + 1).unwrap_err();
        assert_eq!(err.kind(), "batch-too-large");
    }
}
