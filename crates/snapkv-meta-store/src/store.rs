//! Metadata store contract

use async_trait::async_trait;
use snapkv_common::model::{Audit, AuditRecord, Dataset, Version, VersionStatus};
use snapkv_common::types::{ContentType, DatasetName, EvictionPolicy, TableName, VersionId};
use snapkv_common::Result;

/// Request to create a dataset
#[derive(Clone, Debug)]
pub struct NewDataset {
    pub name: DatasetName,
    pub tables: Vec<TableName>,
    pub content_type: Option<ContentType>,
    pub eviction_policy: Option<EvictionPolicy>,
}

/// Request to create a version
///
/// The id is generated by the caller so the orchestrator can return it
/// before the staging work starts.
#[derive(Clone, Debug)]
pub struct NewVersion {
    pub id: VersionId,
    pub dataset: DatasetName,
    pub label: Option<String>,
    pub verification_policy: Option<Audit>,
}

/// Persistence contract for datasets and versions
///
/// Implementations must make `update_status` linearizable per version
/// and `activate_version` linearizable per dataset, using compare-and-set
/// on a counter stored alongside each record. A counter mismatch is
/// `Error::Conflict` and is not retried here.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new dataset with defaults applied.
    ///
    /// # Errors
    /// `DatasetAlreadyExists` when the name is taken.
    async fn create_dataset(&self, new: NewDataset, audit: Option<Audit>) -> Result<Dataset>;

    /// Fetch a dataset; `None` when absent.
    async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>>;

    /// All datasets, ordered by name.
    async fn list_datasets(&self) -> Result<Vec<Dataset>>;

    /// Persist a new version in `preparing` state.
    ///
    /// # Errors
    /// `DatasetNotFound` when the owning dataset does not exist.
    async fn create_version(&self, new: NewVersion, audit: Option<Audit>) -> Result<Version>;

    /// Versions of one dataset, oldest first.
    async fn list_versions_by_dataset(&self, dataset: &DatasetName) -> Result<Vec<Version>>;

    /// Every version across all datasets.
    async fn list_all_versions(&self) -> Result<Vec<Version>>;

    /// Fetch a version; `None` when absent.
    async fn get_version(&self, id: &VersionId) -> Result<Option<Version>>;

    /// Transition a version to `target`, appending one audit record.
    ///
    /// # Errors
    /// `VersionNotFound`, `InvalidTransition` when the edge is not in
    /// the state graph, `Conflict` on a concurrent write.
    async fn update_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version>;

    /// Point the owning dataset's active-version at `id`.
    ///
    /// The target version must be `published`. Activating the version
    /// that is already active is a no-op.
    ///
    /// # Errors
    /// `VersionNotFound`, `Validation` when the version is not
    /// published, `Conflict` on a concurrent write.
    async fn activate_version(&self, id: &VersionId, audit: Option<Audit>) -> Result<Dataset>;
}

/// Materialize a dataset record from a creation request, applying
/// defaults and the creation audit record.
pub(crate) fn build_dataset(new: NewDataset, audit: Option<Audit>) -> Dataset {
    Dataset {
        name: new.name,
        tables: new.tables.into_iter().collect(),
        content_type: new.content_type.unwrap_or_default(),
        eviction_policy: new.eviction_policy.unwrap_or_default(),
        active_version: None,
        operation_log: vec![created_audit(audit)],
    }
}

/// Materialize a version record in `preparing` state.
pub(crate) fn build_version(new: NewVersion, audit: Option<Audit>) -> Version {
    Version {
        id: new.id,
        label: new.label,
        dataset: new.dataset,
        status: VersionStatus::Preparing,
        verification_policy: new.verification_policy,
        operation_log: vec![created_audit(audit)],
    }
}

/// Compute the record resulting from a status transition, checking the
/// edge against the state graph.
pub(crate) fn apply_transition(
    current: &Version,
    target: VersionStatus,
    audit: Option<Audit>,
) -> Result<Version> {
    if !current.status.can_transition_to(target) {
        return Err(snapkv_common::Error::InvalidTransition {
            from: current.status,
            to: target,
        });
    }
    let mut updated = current.clone();
    updated.status = target;
    updated.operation_log.push(status_audit(target, audit));
    Ok(updated)
}

/// Creation instant of a version, taken from its first audit record.
pub(crate) fn created_at(version: &Version) -> chrono::DateTime<chrono::Utc> {
    version
        .operation_log
        .first()
        .map(|r| r.timestamp)
        .unwrap_or_default()
}

/// Build the audit record for a status transition.
pub(crate) fn status_audit(target: VersionStatus, audit: Option<Audit>) -> AuditRecord {
    let mut detail = audit.unwrap_or_default();
    detail.insert("status".to_string(), serde_json::Value::String(target.as_str().to_string()));
    AuditRecord::now("update-status", detail)
}

/// Build the audit record for an activation.
pub(crate) fn activate_audit(id: &VersionId, audit: Option<Audit>) -> AuditRecord {
    let mut detail = audit.unwrap_or_default();
    detail.insert("version-id".to_string(), serde_json::Value::String(id.to_string()));
    AuditRecord::now("activate-version", detail)
}

/// Build the audit record appended on creation.
pub(crate) fn created_audit(audit: Option<Audit>) -> AuditRecord {
    AuditRecord::now("created", audit.unwrap_or_default())
}
