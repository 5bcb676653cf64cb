//! TTL cache for dataset records
//!
//! Sits in front of `get_dataset` on the read path, where the
//! active-version lookup would otherwise hit the metadata store on
//! every entry read. Read-through: misses and expired entries fetch
//! from the store and refill. Only present datasets are cached, so a
//! newly created dataset is visible immediately.

use parking_lot::RwLock;
use snapkv_common::model::Dataset;
use snapkv_common::types::DatasetName;
use snapkv_common::Result;
use snapkv_meta_store::MetadataStore;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CachedDataset {
    fetched_at: Instant,
    dataset: Dataset,
}

/// Read-through dataset cache with a fixed TTL
pub struct DatasetCache {
    ttl: Duration,
    entries: RwLock<HashMap<DatasetName, CachedDataset>>,
}

impl DatasetCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a dataset through the cache.
    pub async fn get(
        &self,
        store: &dyn MetadataStore,
        name: &DatasetName,
    ) -> Result<Option<Dataset>> {
        if let Some(cached) = self.entries.read().get(name) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Some(cached.dataset.clone()));
            }
        }

        let fetched = store.get_dataset(name).await?;
        if let Some(dataset) = &fetched {
            // concurrent fills race harmlessly; the newest fetch wins
            self.entries.write().insert(
                name.clone(),
                CachedDataset {
                    fetched_at: Instant::now(),
                    dataset: dataset.clone(),
                },
            );
        }
        Ok(fetched)
    }
}
