//! Document-store metadata backend
//!
//! Datasets are keyed by name; versions are keyed by id and carry a
//! `{dataset}#{created-millis}` sort key so listing a dataset's versions
//! is a single ordered prefix query. Every mutation is a conditional
//! write on the document counter, which is what makes `update_status`
//! and `activate_version` linearizable.

use crate::store::{
    activate_audit, apply_transition, build_dataset, build_version, created_at, MetadataStore,
    NewDataset, NewVersion,
};
use async_trait::async_trait;
use snapkv_common::document::{Document, DocumentStore};
use snapkv_common::model::{Audit, Dataset, Version, VersionStatus};
use snapkv_common::types::{DatasetName, VersionId};
use snapkv_common::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata store on top of a document database
pub struct DocumentMetadataStore {
    client: Arc<dyn DocumentStore>,
    dataset_table: String,
    version_table: String,
}

impl DocumentMetadataStore {
    pub fn new(
        client: Arc<dyn DocumentStore>,
        dataset_table: impl Into<String>,
        version_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            dataset_table: dataset_table.into(),
            version_table: version_table.into(),
        }
    }

    fn version_sort_key(version: &Version) -> String {
        format!(
            "{}#{:020}",
            version.dataset,
            created_at(version).timestamp_millis()
        )
    }

    fn decode_dataset(doc: &Document) -> Result<Dataset> {
        serde_json::from_value(doc.body.clone())
            .map_err(|e| Error::internal(format!("corrupt dataset record {}: {e}", doc.key)))
    }

    fn decode_version(doc: &Document) -> Result<Version> {
        serde_json::from_value(doc.body.clone())
            .map_err(|e| Error::internal(format!("corrupt version record {}: {e}", doc.key)))
    }

    fn encode<T: serde::Serialize>(record: &T) -> Result<serde_json::Value> {
        serde_json::to_value(record).map_err(|e| Error::internal(format!("encode record: {e}")))
    }

    async fn get_version_doc(&self, id: &VersionId) -> Result<Option<(Version, u64)>> {
        match self.client.get(&self.version_table, &id.to_string()).await? {
            Some(doc) => {
                let version = Self::decode_version(&doc)?;
                Ok(Some((version, doc.ver)))
            }
            None => Ok(None),
        }
    }

    async fn get_dataset_doc(&self, name: &DatasetName) -> Result<Option<(Dataset, u64)>> {
        match self.client.get(&self.dataset_table, name.as_str()).await? {
            Some(doc) => {
                let dataset = Self::decode_dataset(&doc)?;
                Ok(Some((dataset, doc.ver)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MetadataStore for DocumentMetadataStore {
    async fn create_dataset(&self, new: NewDataset, audit: Option<Audit>) -> Result<Dataset> {
        let name = new.name.clone();
        if self.get_dataset_doc(&name).await?.is_some() {
            return Err(Error::DatasetAlreadyExists(name));
        }
        let dataset = build_dataset(new, audit);
        let doc = Document::new(dataset.name.as_str(), Self::encode(&dataset)?);
        // insert; a racing creator loses here and maps to already-exists
        self.client
            .put(&self.dataset_table, doc, None)
            .await
            .map_err(|e| match e {
                Error::Conflict { .. } => Error::DatasetAlreadyExists(name),
                other => other,
            })?;
        info!(dataset = %dataset.name, "persisted dataset record");
        Ok(dataset)
    }

    async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>> {
        Ok(self.get_dataset_doc(name).await?.map(|(d, _)| d))
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let docs = self.client.scan(&self.dataset_table).await?;
        let mut all = docs
            .iter()
            .map(Self::decode_dataset)
            .collect::<Result<Vec<_>>>()?;
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn create_version(&self, new: NewVersion, audit: Option<Audit>) -> Result<Version> {
        if self.get_dataset_doc(&new.dataset).await?.is_none() {
            return Err(Error::DatasetNotFound(new.dataset));
        }
        let version = build_version(new, audit);
        let doc = Document::new(version.id.to_string(), Self::encode(&version)?)
            .with_sort_key(Self::version_sort_key(&version));
        self.client.put(&self.version_table, doc, None).await?;
        Ok(version)
    }

    async fn list_versions_by_dataset(&self, dataset: &DatasetName) -> Result<Vec<Version>> {
        let docs = self
            .client
            .query_sorted(&self.version_table, &format!("{dataset}#"), usize::MAX)
            .await?;
        docs.iter().map(Self::decode_version).collect()
    }

    async fn list_all_versions(&self) -> Result<Vec<Version>> {
        let docs = self.client.scan(&self.version_table).await?;
        let mut all = docs
            .iter()
            .map(Self::decode_version)
            .collect::<Result<Vec<_>>>()?;
        all.sort_by_key(|v| (v.dataset.clone(), created_at(v), v.id));
        Ok(all)
    }

    async fn get_version(&self, id: &VersionId) -> Result<Option<Version>> {
        Ok(self.get_version_doc(id).await?.map(|(v, _)| v))
    }

    async fn update_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version> {
        let (current, counter) = self
            .get_version_doc(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;
        let updated = apply_transition(&current, target, audit)?;
        let doc = Document::new(id.to_string(), Self::encode(&updated)?)
            .with_sort_key(Self::version_sort_key(&updated));
        self.client
            .put(&self.version_table, doc, Some(counter))
            .await
            .map_err(|e| match e {
                Error::Conflict { .. } => Error::Conflict {
                    entity: "version",
                    id: id.to_string(),
                },
                other => other,
            })?;
        debug!(version = %id, status = %target, "persisted status transition");
        Ok(updated)
    }

    async fn activate_version(&self, id: &VersionId, audit: Option<Audit>) -> Result<Dataset> {
        let (version, _) = self
            .get_version_doc(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;
        if version.status != VersionStatus::Published {
            return Err(Error::validation(format!(
                "version {id} is {} and cannot be activated",
                version.status
            )));
        }

        let (dataset, counter) = self
            .get_dataset_doc(&version.dataset)
            .await?
            .ok_or_else(|| Error::DatasetNotFound(version.dataset.clone()))?;
        if dataset.active_version == Some(*id) {
            return Ok(dataset);
        }

        let mut updated = dataset;
        updated.active_version = Some(*id);
        updated.operation_log.push(activate_audit(id, audit));
        let doc = Document::new(updated.name.as_str(), Self::encode(&updated)?);
        self.client
            .put(&self.dataset_table, doc, Some(counter))
            .await
            .map_err(|e| match e {
                Error::Conflict { .. } => Error::Conflict {
                    entity: "dataset",
                    id: updated.name.to_string(),
                },
                other => other,
            })?;
        Ok(updated)
    }
}
