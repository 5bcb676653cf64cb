//! Metadata store for SnapKV
//!
//! Persists datasets and versions, enforces the version status state
//! machine, and provides linearizable status transitions through
//! compare-and-set on a per-record counter.
//!
//! The [`MetadataStore`] trait is the contract; [`MemoryMetadataStore`]
//! is the in-memory reference, [`DocumentMetadataStore`] targets a
//! document database. [`ValidatingMetaStore`] and
//! [`InstrumentedMetaStore`] are wrapping adapters for schema validation
//! and operation counters.

pub mod document;
pub mod memory;
pub mod observe;
pub mod store;
pub mod validate;

pub use document::DocumentMetadataStore;
pub use memory::MemoryMetadataStore;
pub use observe::{InstrumentedMetaStore, MetaStoreCounters};
pub use store::{MetadataStore, NewDataset, NewVersion};
pub use validate::ValidatingMetaStore;
