//! Operation counters for the metadata store
//!
//! A wrapping adapter that counts calls and failures per operation. The
//! snapshot is cheap to read and is what a metrics exporter would
//! scrape; no export surface ships with the core.

use crate::store::{MetadataStore, NewDataset, NewVersion};
use async_trait::async_trait;
use snapkv_common::model::{Audit, Dataset, Version, VersionStatus};
use snapkv_common::types::{DatasetName, VersionId};
use snapkv_common::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct OpCounter {
    calls: AtomicU64,
    failures: AtomicU64,
}

impl OpCounter {
    fn record<T>(&self, result: &Result<T>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Default)]
struct Counters {
    create_dataset: OpCounter,
    get_dataset: OpCounter,
    list_datasets: OpCounter,
    create_version: OpCounter,
    list_versions: OpCounter,
    get_version: OpCounter,
    update_status: OpCounter,
    activate_version: OpCounter,
}

/// Point-in-time snapshot of call/failure counts per operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaStoreCounters {
    pub create_dataset: (u64, u64),
    pub get_dataset: (u64, u64),
    pub list_datasets: (u64, u64),
    pub create_version: (u64, u64),
    pub list_versions: (u64, u64),
    pub get_version: (u64, u64),
    pub update_status: (u64, u64),
    pub activate_version: (u64, u64),
}

/// Wrapping adapter that counts operations against any metadata store
pub struct InstrumentedMetaStore<S> {
    inner: S,
    counters: Arc<Counters>,
}

impl<S> InstrumentedMetaStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Snapshot the counters as `(calls, failures)` pairs.
    #[must_use]
    pub fn counters(&self) -> MetaStoreCounters {
        let snap = |c: &OpCounter| {
            (
                c.calls.load(Ordering::Relaxed),
                c.failures.load(Ordering::Relaxed),
            )
        };
        MetaStoreCounters {
            create_dataset: snap(&self.counters.create_dataset),
            get_dataset: snap(&self.counters.get_dataset),
            list_datasets: snap(&self.counters.list_datasets),
            create_version: snap(&self.counters.create_version),
            list_versions: snap(&self.counters.list_versions),
            get_version: snap(&self.counters.get_version),
            update_status: snap(&self.counters.update_status),
            activate_version: snap(&self.counters.activate_version),
        }
    }
}

#[async_trait]
impl<S: MetadataStore> MetadataStore for InstrumentedMetaStore<S> {
    async fn create_dataset(&self, new: NewDataset, audit: Option<Audit>) -> Result<Dataset> {
        let result = self.inner.create_dataset(new, audit).await;
        self.counters.create_dataset.record(&result);
        result
    }

    async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>> {
        let result = self.inner.get_dataset(name).await;
        self.counters.get_dataset.record(&result);
        result
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let result = self.inner.list_datasets().await;
        self.counters.list_datasets.record(&result);
        result
    }

    async fn create_version(&self, new: NewVersion, audit: Option<Audit>) -> Result<Version> {
        let result = self.inner.create_version(new, audit).await;
        self.counters.create_version.record(&result);
        result
    }

    async fn list_versions_by_dataset(&self, dataset: &DatasetName) -> Result<Vec<Version>> {
        let result = self.inner.list_versions_by_dataset(dataset).await;
        self.counters.list_versions.record(&result);
        result
    }

    async fn list_all_versions(&self) -> Result<Vec<Version>> {
        let result = self.inner.list_all_versions().await;
        self.counters.list_versions.record(&result);
        result
    }

    async fn get_version(&self, id: &VersionId) -> Result<Option<Version>> {
        let result = self.inner.get_version(id).await;
        self.counters.get_version.record(&result);
        result
    }

    async fn update_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version> {
        let result = self.inner.update_status(id, target, audit).await;
        self.counters.update_status.record(&result);
        result
    }

    async fn activate_version(&self, id: &VersionId, audit: Option<Audit>) -> Result<Dataset> {
        let result = self.inner.activate_version(id, audit).await;
        self.counters.activate_version.record(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMetadataStore;
    use snapkv_common::types::TableName;

    #[tokio::test]
    async fn test_counts_calls_and_failures() {
        let store = InstrumentedMetaStore::new(MemoryMetadataStore::new());
        let request = NewDataset {
            name: DatasetName::new_unchecked("recs"),
            tables: vec![TableName::new_unchecked("items")],
            content_type: None,
            eviction_policy: None,
        };
        store.create_dataset(request.clone(), None).await.unwrap();
        // duplicate fails but is still counted
        store.create_dataset(request, None).await.unwrap_err();
        store
            .get_dataset(&DatasetName::new_unchecked("recs"))
            .await
            .unwrap();

        let counters = store.counters();
        assert_eq!(counters.create_dataset, (2, 1));
        assert_eq!(counters.get_dataset, (1, 0));
        assert_eq!(counters.update_status, (0, 0));
    }
}
