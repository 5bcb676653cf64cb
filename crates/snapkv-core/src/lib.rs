//! SnapKV core
//!
//! The [`Orchestrator`] is the synchronous API-facing layer: it
//! validates client operations against the metadata store, writes
//! entries, and enqueues background actions. The [`Worker`] is the
//! long-running loop that reserves those actions and drives version
//! status transitions, including the publish cutover that flips a
//! dataset's active version.

pub mod cache;
pub mod orchestrator;
pub mod worker;

pub use cache::DatasetCache;
pub use orchestrator::{
    CreateVersion, EntriesRead, EntryRead, LoadEntry, LoadRequest, Orchestrator, OrchestratorConfig,
};
pub use worker::{Worker, WorkerHandle};
