//! Durable task queue for SnapKV
//!
//! At-least-once delivery of action messages, partitioned by topic.
//! Consumers reserve the next message under a time-bounded lease,
//! acknowledge on success, and extend the lease for long work; an
//! expired lease makes the message reservable again. Ordering prefers
//! earlier timestamps but is not strict FIFO under contention.

pub mod document;
pub mod memory;
pub mod message;
pub mod queue;

pub use document::DocumentTaskQueue;
pub use memory::MemoryTaskQueue;
pub use message::{ActionMessage, MessageFilter, MessageStatus, QueueMessage, StatusFilter};
pub use queue::TaskQueue;
