//! In-memory metadata store
//!
//! Reference implementation of the [`MetadataStore`] contract. Mutations
//! follow the same discipline as the remote backend: snapshot the record
//! and its counter, compute the new record, then write conditionally on
//! the counter being unchanged. Interleaved writers therefore surface
//! `Conflict` exactly as they would against a document database.

use crate::store::{
    activate_audit, apply_transition, build_dataset, build_version, created_at, MetadataStore,
    NewDataset, NewVersion,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use snapkv_common::model::{Audit, Dataset, Version, VersionStatus};
use snapkv_common::types::{DatasetName, VersionId};
use snapkv_common::{Error, Result};
use std::collections::HashMap;

struct Stored<T> {
    record: T,
    ver: u64,
}

/// In-memory metadata store
#[derive(Default)]
pub struct MemoryMetadataStore {
    datasets: RwLock<HashMap<DatasetName, Stored<Dataset>>>,
    versions: RwLock<HashMap<VersionId, Stored<Version>>>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_dataset(&self, new: NewDataset, audit: Option<Audit>) -> Result<Dataset> {
        let mut datasets = self.datasets.write();
        if datasets.contains_key(&new.name) {
            return Err(Error::DatasetAlreadyExists(new.name));
        }
        let dataset = build_dataset(new, audit);
        datasets.insert(
            dataset.name.clone(),
            Stored {
                record: dataset.clone(),
                ver: 1,
            },
        );
        Ok(dataset)
    }

    async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>> {
        Ok(self.datasets.read().get(name).map(|s| s.record.clone()))
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let mut all: Vec<Dataset> = self
            .datasets
            .read()
            .values()
            .map(|s| s.record.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn create_version(&self, new: NewVersion, audit: Option<Audit>) -> Result<Version> {
        if !self.datasets.read().contains_key(&new.dataset) {
            return Err(Error::DatasetNotFound(new.dataset));
        }
        let version = build_version(new, audit);
        let mut versions = self.versions.write();
        if versions.contains_key(&version.id) {
            return Err(Error::Conflict {
                entity: "version",
                id: version.id.to_string(),
            });
        }
        versions.insert(
            version.id,
            Stored {
                record: version.clone(),
                ver: 1,
            },
        );
        Ok(version)
    }

    async fn list_versions_by_dataset(&self, dataset: &DatasetName) -> Result<Vec<Version>> {
        let mut matching: Vec<Version> = self
            .versions
            .read()
            .values()
            .filter(|s| &s.record.dataset == dataset)
            .map(|s| s.record.clone())
            .collect();
        matching.sort_by_key(|v| (created_at(v), v.id));
        Ok(matching)
    }

    async fn list_all_versions(&self) -> Result<Vec<Version>> {
        let mut all: Vec<Version> = self
            .versions
            .read()
            .values()
            .map(|s| s.record.clone())
            .collect();
        all.sort_by_key(|v| (v.dataset.clone(), created_at(v), v.id));
        Ok(all)
    }

    async fn get_version(&self, id: &VersionId) -> Result<Option<Version>> {
        Ok(self.versions.read().get(id).map(|s| s.record.clone()))
    }

    async fn update_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version> {
        let (snapshot, expected) = {
            let versions = self.versions.read();
            let stored = versions.get(id).ok_or(Error::VersionNotFound(*id))?;
            (stored.record.clone(), stored.ver)
        };
        let updated = apply_transition(&snapshot, target, audit)?;

        let mut versions = self.versions.write();
        let stored = versions.get_mut(id).ok_or(Error::VersionNotFound(*id))?;
        if stored.ver != expected {
            return Err(Error::Conflict {
                entity: "version",
                id: id.to_string(),
            });
        }
        stored.record = updated.clone();
        stored.ver += 1;
        Ok(updated)
    }

    async fn activate_version(&self, id: &VersionId, audit: Option<Audit>) -> Result<Dataset> {
        let version = self
            .get_version(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;
        if version.status != VersionStatus::Published {
            return Err(Error::validation(format!(
                "version {id} is {} and cannot be activated",
                version.status
            )));
        }

        let (snapshot, expected) = {
            let datasets = self.datasets.read();
            let stored = datasets
                .get(&version.dataset)
                .ok_or_else(|| Error::DatasetNotFound(version.dataset.clone()))?;
            (stored.record.clone(), stored.ver)
        };
        if snapshot.active_version == Some(*id) {
            return Ok(snapshot);
        }

        let mut updated = snapshot;
        updated.active_version = Some(*id);
        updated.operation_log.push(activate_audit(id, audit));

        let mut datasets = self.datasets.write();
        let stored = datasets
            .get_mut(&version.dataset)
            .ok_or_else(|| Error::DatasetNotFound(version.dataset.clone()))?;
        if stored.ver != expected {
            return Err(Error::Conflict {
                entity: "dataset",
                id: version.dataset.to_string(),
            });
        }
        stored.record = updated.clone();
        stored.ver += 1;
        Ok(updated)
    }
}
