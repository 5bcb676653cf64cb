//! Entry store for SnapKV
//!
//! Persists opaque values keyed by `(dataset, version, table, key)`.
//! Writes are idempotent upserts; versioning lives in the key, not in
//! the store. [`MemoryEntryStore`] is the in-memory reference,
//! [`DocumentEntryStore`] targets a document database, and
//! [`EnvelopeStore`] is a transparent binary-envelope layer on top of
//! either.

pub mod document;
pub mod envelope;
pub mod memory;
pub mod store;

pub use document::DocumentEntryStore;
pub use envelope::EnvelopeStore;
pub use memory::MemoryEntryStore;
pub use store::{EntryRef, EntryStore, MAX_BATCH};
