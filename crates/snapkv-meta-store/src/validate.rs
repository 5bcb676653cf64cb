//! Schema-validating metadata store wrapper
//!
//! Validation is part of the store contract: invalid shapes fail with a
//! validation error before touching storage. The wrapper keeps that
//! concern out of the backends themselves, so every backend gets the
//! same checks by composition.

use crate::store::{MetadataStore, NewDataset, NewVersion};
use async_trait::async_trait;
use snapkv_common::model::{Audit, Dataset, Version, VersionStatus};
use snapkv_common::types::{DatasetName, TableName, VersionId};
use snapkv_common::{Error, Result};
use std::collections::HashSet;

/// Wrapping adapter that validates write arguments before delegating
pub struct ValidatingMetaStore<S> {
    inner: S,
}

impl<S> ValidatingMetaStore<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Consume the wrapper, returning the wrapped store.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn check_name(name: &DatasetName) -> Result<()> {
    DatasetName::new(name.as_str())?;
    Ok(())
}

fn check_tables(tables: &[TableName]) -> Result<()> {
    if tables.is_empty() {
        return Err(Error::validation("dataset must declare at least one table"));
    }
    let mut seen = HashSet::new();
    for table in tables {
        TableName::new(table.as_str())?;
        if !seen.insert(table) {
            return Err(Error::validation(format!("duplicate table name: {table}")));
        }
    }
    Ok(())
}

fn check_label(label: Option<&str>) -> Result<()> {
    if let Some(label) = label {
        if label.is_empty() {
            return Err(Error::validation("label must not be empty"));
        }
    }
    Ok(())
}

#[async_trait]
impl<S: MetadataStore> MetadataStore for ValidatingMetaStore<S> {
    async fn create_dataset(&self, new: NewDataset, audit: Option<Audit>) -> Result<Dataset> {
        check_name(&new.name)?;
        check_tables(&new.tables)?;
        if let Some(policy) = &new.eviction_policy {
            if !policy.is_valid() {
                return Err(Error::validation("eviction policy must keep at least one version"));
            }
        }
        self.inner.create_dataset(new, audit).await
    }

    async fn get_dataset(&self, name: &DatasetName) -> Result<Option<Dataset>> {
        self.inner.get_dataset(name).await
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        self.inner.list_datasets().await
    }

    async fn create_version(&self, new: NewVersion, audit: Option<Audit>) -> Result<Version> {
        check_name(&new.dataset)?;
        check_label(new.label.as_deref())?;
        self.inner.create_version(new, audit).await
    }

    async fn list_versions_by_dataset(&self, dataset: &DatasetName) -> Result<Vec<Version>> {
        self.inner.list_versions_by_dataset(dataset).await
    }

    async fn list_all_versions(&self) -> Result<Vec<Version>> {
        self.inner.list_all_versions().await
    }

    async fn get_version(&self, id: &VersionId) -> Result<Option<Version>> {
        self.inner.get_version(id).await
    }

    async fn update_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<Version> {
        self.inner.update_status(id, target, audit).await
    }

    async fn activate_version(&self, id: &VersionId, audit: Option<Audit>) -> Result<Dataset> {
        self.inner.activate_version(id, audit).await
    }
}
