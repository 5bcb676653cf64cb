//! Shared foundation for SnapKV
//!
//! This crate defines the pieces every other SnapKV crate builds on:
//! the common error type with its HTTP mapping, validated identifier
//! newtypes, the dataset/version records and their status state machine,
//! configuration loading, and the document-store client abstraction used
//! by the remote backend implementations.

pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod types;

pub use config::{BackendType, Config};
pub use document::{Document, DocumentStore, MemoryDocumentStore};
pub use error::{Error, Result};
pub use model::{Audit, AuditRecord, Dataset, Version, VersionStatus};
pub use types::{ContentType, DatasetName, EntryKey, EvictionPolicy, NameError, TableName, TableRef, VersionId};
