//! Synchronous API-facing layer
//!
//! Validates client operations against the metadata store, writes the
//! metadata and entry stores, and enqueues background actions. Never
//! waits on the worker: callers observe the intermediate status and
//! poll.

use crate::cache::DatasetCache;
use bytes::Bytes;
use snapkv_common::model::{Audit, Dataset, Version, VersionStatus};
use snapkv_common::types::{DatasetName, EntryKey, TableName, TableRef, VersionId};
use snapkv_common::{Error, Result};
use snapkv_entry_store::{EntryRef, EntryStore};
use snapkv_meta_store::{MetadataStore, NewDataset, NewVersion};
use snapkv_queue::{ActionMessage, TaskQueue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Orchestrator tuning knobs
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Topic the worker consumes action messages from
    pub operations_topic: String,
    /// How long resolved dataset records may be served from cache on
    /// the read path
    pub dataset_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            operations_topic: "snapkv-operations".to_string(),
            dataset_cache_ttl: Duration::from_secs(10),
        }
    }
}

/// Request to create a version
#[derive(Clone, Debug)]
pub struct CreateVersion {
    pub dataset: DatasetName,
    pub label: Option<String>,
    pub verification_policy: Option<Audit>,
}

/// One entry in a load request
#[derive(Clone, Debug)]
pub struct LoadEntry {
    pub table: TableName,
    pub key: EntryKey,
    pub value: Bytes,
}

/// Normalized batch-load request
///
/// The API surface accepts three shapes; all of them normalize to this
/// one through the constructors.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub version_id: VersionId,
    pub dataset: DatasetName,
    pub entries: Vec<LoadEntry>,
}

impl LoadRequest {
    /// Entries spanning multiple tables of one dataset.
    #[must_use]
    pub fn new(version_id: VersionId, dataset: DatasetName, entries: Vec<LoadEntry>) -> Self {
        Self {
            version_id,
            dataset,
            entries,
        }
    }

    /// Entries for a single table.
    #[must_use]
    pub fn for_table(
        version_id: VersionId,
        dataset: DatasetName,
        table: TableName,
        items: Vec<(EntryKey, Bytes)>,
    ) -> Self {
        let entries = items
            .into_iter()
            .map(|(key, value)| LoadEntry {
                table: table.clone(),
                key,
                value,
            })
            .collect();
        Self::new(version_id, dataset, entries)
    }

    /// A single entry.
    #[must_use]
    pub fn single(
        version_id: VersionId,
        dataset: DatasetName,
        table: TableName,
        key: EntryKey,
        value: Bytes,
    ) -> Self {
        Self::for_table(version_id, dataset, table, vec![(key, value)])
    }
}

/// Result of a single-entry read
#[derive(Clone, Debug)]
pub struct EntryRead {
    /// The dataset's active version at resolution time, if any
    pub active_version_id: Option<VersionId>,
    /// The version the value was read from
    pub version_id: VersionId,
    pub value: Bytes,
}

/// Result of a batch read
#[derive(Clone, Debug)]
pub struct EntriesRead {
    pub active_version_id: Option<VersionId>,
    pub version_id: VersionId,
    /// Every requested key, with `None` for misses
    pub entries: HashMap<EntryKey, Option<Bytes>>,
}

/// The synchronous core API
pub struct Orchestrator {
    meta: Arc<dyn MetadataStore>,
    entries: Arc<dyn EntryStore>,
    queue: Arc<dyn TaskQueue>,
    config: OrchestratorConfig,
    cache: DatasetCache,
}

impl Orchestrator {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        entries: Arc<dyn EntryStore>,
        queue: Arc<dyn TaskQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        let cache = DatasetCache::new(config.dataset_cache_ttl);
        Self {
            meta,
            entries,
            queue,
            config,
            cache,
        }
    }

    // ---- Dataset operations ----

    /// Create a dataset. The name is the identity; duplicates are
    /// rejected by the metadata store.
    pub async fn create_dataset(&self, request: NewDataset) -> Result<Dataset> {
        let dataset = self.meta.create_dataset(request, None).await?;
        info!(dataset = %dataset.name, "created dataset");
        Ok(dataset)
    }

    pub async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>> {
        self.meta.get_dataset(name).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        self.meta.list_datasets().await
    }

    // ---- Version operations ----

    /// Create a version in `preparing` state and enqueue its
    /// preparation. The caller observes `preparing` and polls.
    pub async fn create_version(&self, request: CreateVersion) -> Result<Version> {
        let id = VersionId::new();
        let version = self
            .meta
            .create_version(
                NewVersion {
                    id,
                    dataset: request.dataset,
                    label: request.label,
                    verification_policy: request.verification_policy,
                },
                None,
            )
            .await?;
        self.queue
            .send(
                &self.config.operations_topic,
                ActionMessage::Prepare { version_id: id },
            )
            .await?;
        info!(version = %id, dataset = %version.dataset, "created version");
        Ok(version)
    }

    pub async fn get_version(&self, id: &VersionId) -> Result<Option<Version>> {
        self.meta.get_version(id).await
    }

    pub async fn list_versions(&self, dataset: Option<&DatasetName>) -> Result<Vec<Version>> {
        match dataset {
            Some(dataset) => self.meta.list_versions_by_dataset(dataset).await,
            None => self.meta.list_all_versions().await,
        }
    }

    /// Move a version to `saving` and enqueue the save.
    pub async fn save(&self, id: &VersionId, audit: Option<Audit>) -> Result<Version> {
        let version = self.transition(id, VersionStatus::Saving, audit).await?;
        self.queue
            .send(
                &self.config.operations_topic,
                ActionMessage::Save { version_id: *id },
            )
            .await?;
        Ok(version)
    }

    /// Move a version to `publishing` and enqueue the publish.
    pub async fn publish(&self, id: &VersionId, audit: Option<Audit>) -> Result<Version> {
        let version = self.transition(id, VersionStatus::Publishing, audit).await?;
        self.queue
            .send(
                &self.config.operations_topic,
                ActionMessage::Publish { version_id: *id },
            )
            .await?;
        Ok(version)
    }

    /// Discard a version. Terminal, so nothing is enqueued.
    pub async fn discard(&self, id: &VersionId, reason: Option<String>) -> Result<Version> {
        let mut audit = Audit::new();
        if let Some(reason) = reason {
            audit.insert("reason".to_string(), serde_json::Value::String(reason));
        }
        self.transition(id, VersionStatus::Discarded, Some(audit))
            .await
    }

    async fn transition(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version> {
        let version = self
            .meta
            .get_version(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;
        if !version.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: version.status,
                to: target,
            });
        }
        // the store re-checks under CAS; a racer surfaces Conflict here
        self.meta.update_status(id, target, audit).await
    }

    // ---- Entry operations ----

    /// Stage a batch of entries into an `awaiting-entries` version.
    ///
    /// Returns the number of entries written.
    pub async fn load_entries(&self, request: LoadRequest) -> Result<usize> {
        let version = self
            .meta
            .get_version(&request.version_id)
            .await?
            .ok_or(Error::VersionNotFound(request.version_id))?;
        if version.dataset != request.dataset {
            return Err(Error::InvalidVersionForDataset {
                version: Box::new(version),
                requested: request.dataset,
            });
        }
        if version.status != VersionStatus::AwaitingEntries {
            return Err(Error::InvalidVersionState {
                version: Box::new(version),
                expected: VersionStatus::AwaitingEntries,
            });
        }

        // one metadata read serves every entry in the call
        let dataset = self
            .meta
            .get_dataset(&request.dataset)
            .await?
            .ok_or_else(|| Error::DatasetNotFound(request.dataset.clone()))?;
        let referenced: BTreeSet<&TableName> = request.entries.iter().map(|e| &e.table).collect();
        let missing: Vec<TableRef> = referenced
            .into_iter()
            .filter(|table| !dataset.has_table(table))
            .map(|table| TableRef {
                dataset: request.dataset.clone(),
                table: table.clone(),
            })
            .collect();
        if !missing.is_empty() {
            return Err(Error::TablesNotFound { missing });
        }

        let count = request.entries.len();
        let batch: Vec<(EntryRef, Bytes)> = request
            .entries
            .into_iter()
            .map(|entry| {
                (
                    EntryRef {
                        dataset: request.dataset.clone(),
                        version: request.version_id,
                        table: entry.table,
                        key: entry.key,
                    },
                    entry.value,
                )
            })
            .collect();
        self.entries.put_many(batch).await?;
        debug!(version = %request.version_id, count, "loaded entries");
        Ok(count)
    }

    /// Read one entry, resolving the version from the dataset's active
    /// version when none is given.
    pub async fn get_entry(
        &self,
        version_id: Option<VersionId>,
        dataset: &DatasetName,
        table: &TableName,
        key: &EntryKey,
    ) -> Result<EntryRead> {
        let (active, effective) = self.resolve_version(dataset, version_id).await?;
        let value = self
            .entries
            .get_one(&EntryRef {
                dataset: dataset.clone(),
                version: effective,
                table: table.clone(),
                key: key.clone(),
            })
            .await?
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        Ok(EntryRead {
            active_version_id: active,
            version_id: effective,
            value,
        })
    }

    /// Read a batch of entries from one table.
    pub async fn get_entries(
        &self,
        version_id: Option<VersionId>,
        dataset: &DatasetName,
        table: &TableName,
        keys: Vec<EntryKey>,
    ) -> Result<EntriesRead> {
        let (active, effective) = self.resolve_version(dataset, version_id).await?;
        let refs = keys
            .into_iter()
            .map(|key| EntryRef {
                dataset: dataset.clone(),
                version: effective,
                table: table.clone(),
                key,
            })
            .collect();
        let fetched = self.entries.get_many(refs).await?;
        Ok(EntriesRead {
            active_version_id: active,
            version_id: effective,
            entries: fetched
                .into_iter()
                .map(|(entry_ref, value)| (entry_ref.key, value))
                .collect(),
        })
    }

    async fn resolve_version(
        &self,
        dataset: &DatasetName,
        version_id: Option<VersionId>,
    ) -> Result<(Option<VersionId>, VersionId)> {
        let record = self
            .cache
            .get(self.meta.as_ref(), dataset)
            .await?
            .ok_or_else(|| Error::DatasetNotFound(dataset.clone()))?;
        let active = record.active_version;
        let effective = version_id
            .or(active)
            .ok_or_else(|| Error::NoActiveVersion(dataset.clone()))?;
        Ok((active, effective))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapkv_entry_store::MemoryEntryStore;
    use snapkv_meta_store::MemoryMetadataStore;
    use snapkv_queue::{MemoryTaskQueue, MessageFilter};

    fn setup() -> (Orchestrator, Arc<MemoryMetadataStore>, Arc<MemoryTaskQueue>) {
        let meta = Arc::new(MemoryMetadataStore::new());
        let queue = Arc::new(MemoryTaskQueue::new(Duration::from_secs(60)));
        let orchestrator = Orchestrator::new(
            meta.clone(),
            Arc::new(MemoryEntryStore::new()),
            queue.clone(),
            OrchestratorConfig {
                operations_topic: "ops".to_string(),
                dataset_cache_ttl: Duration::ZERO,
            },
        );
        (orchestrator, meta, queue)
    }

    fn dataset_request(name: &str, tables: &[&str]) -> NewDataset {
        NewDataset {
            name: DatasetName::new_unchecked(name),
            tables: tables.iter().map(|t| TableName::new_unchecked(*t)).collect(),
            content_type: None,
            eviction_policy: None,
        }
    }

    fn create_request(dataset: &str) -> CreateVersion {
        CreateVersion {
            dataset: DatasetName::new_unchecked(dataset),
            label: None,
            verification_policy: None,
        }
    }

    fn load(version_id: VersionId, dataset: &str, table: &str, key: &str, value: &str) -> LoadRequest {
        LoadRequest::single(
            version_id,
            DatasetName::new_unchecked(dataset),
            TableName::new_unchecked(table),
            EntryKey::new_unchecked(key),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    #[tokio::test]
    async fn test_create_version_enqueues_prepare() {
        let (orchestrator, _, queue) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        assert_eq!(version.status, VersionStatus::Preparing);

        let pending = queue.list(&MessageFilter::topic("ops")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].body,
            ActionMessage::Prepare {
                version_id: version.id
            }
        );
    }

    #[tokio::test]
    async fn test_create_version_unknown_dataset() {
        let (orchestrator, _, _) = setup();
        let err = orchestrator
            .create_version(create_request("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dataset-not-found");
    }

    #[tokio::test]
    async fn test_load_rejects_wrong_state() {
        let (orchestrator, _, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();

        // still preparing; nothing may be staged yet
        let err = orchestrator
            .load_entries(load(version.id, "recs", "items", "k1", "v"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-version-state");
    }

    #[tokio::test]
    async fn test_load_rejects_wrong_dataset() {
        let (orchestrator, meta, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        orchestrator
            .create_dataset(dataset_request("ads", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        meta.update_status(&version.id, VersionStatus::AwaitingEntries, None)
            .await
            .unwrap();

        let err = orchestrator
            .load_entries(load(version.id, "ads", "items", "k1", "v"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-version-for-dataset");
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_tables() {
        let (orchestrator, meta, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        meta.update_status(&version.id, VersionStatus::AwaitingEntries, None)
            .await
            .unwrap();

        let request = LoadRequest::new(
            version.id,
            DatasetName::new_unchecked("recs"),
            vec![
                LoadEntry {
                    table: TableName::new_unchecked("items"),
                    key: EntryKey::new_unchecked("k"),
                    value: Bytes::from_static(b"v"),
                },
                LoadEntry {
                    table: TableName::new_unchecked("ghost"),
                    key: EntryKey::new_unchecked("k"),
                    value: Bytes::from_static(b"v"),
                },
            ],
        );
        match orchestrator.load_entries(request).await.unwrap_err() {
            Error::TablesNotFound { missing } => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].table.as_str(), "ghost");
                assert_eq!(missing[0].dataset.as_str(), "recs");
            }
            other => panic!("expected tables-not-found, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_missing_version() {
        let (orchestrator, _, _) = setup();
        let err = orchestrator
            .load_entries(load(VersionId::new(), "recs", "items", "k", "v"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "version-not-found");
    }

    #[tokio::test]
    async fn test_save_requires_awaiting_entries() {
        let (orchestrator, _, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        let err = orchestrator.save(&version.id, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-transition");
    }

    #[tokio::test]
    async fn test_discard_is_terminal_and_not_enqueued() {
        let (orchestrator, _, queue) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        let before = queue.list(&MessageFilter::topic("ops")).await.unwrap().len();

        let discarded = orchestrator
            .discard(&version.id, Some("abandoned".to_string()))
            .await
            .unwrap();
        assert_eq!(discarded.status, VersionStatus::Discarded);
        let record = discarded.operation_log.last().unwrap();
        assert_eq!(record.detail["reason"], "abandoned");

        let after = queue.list(&MessageFilter::topic("ops")).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_read_without_active_version() {
        let (orchestrator, _, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let err = orchestrator
            .get_entry(
                None,
                &DatasetName::new_unchecked("recs"),
                &TableName::new_unchecked("items"),
                &EntryKey::new_unchecked("k"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no-active-version");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_have_one_winner() {
        let (orchestrator, meta, _) = setup();
        orchestrator
            .create_dataset(dataset_request("recs", &["items"]))
            .await
            .unwrap();
        let version = orchestrator.create_version(create_request("recs")).await.unwrap();
        meta.update_status(&version.id, VersionStatus::AwaitingEntries, None)
            .await
            .unwrap();

        let orchestrator = Arc::new(orchestrator);
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let orchestrator = Arc::clone(&orchestrator);
            let id = version.id;
            tasks.push(tokio::spawn(async move { orchestrator.save(&id, None).await }));
        }

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) => assert!(
                    matches!(err.kind(), "conflict" | "invalid-transition"),
                    "unexpected error: {err}"
                ),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(
            meta.get_version(&version.id).await.unwrap().unwrap().status,
            VersionStatus::Saving
        );
    }
}
