//! Task queue contract

use crate::message::{ActionMessage, MessageFilter, QueueMessage};
use async_trait::async_trait;
use snapkv_common::Result;

/// How many of the earliest reservable candidates a reservation pass
/// considers. Keeps "find next" cheap on large backlogs at the cost of
/// strict FIFO under contention.
pub(crate) const RESERVE_CANDIDATES: usize = 10;

/// How many times a reservation restarts selection after losing a
/// compare-and-set race before reporting no message.
pub(crate) const RESERVE_ATTEMPTS: usize = 5;

/// Durable at-least-once queue of action messages
///
/// Delivery prefers earlier timestamps within a topic but is not
/// strictly FIFO. Reservation grants a lease; only the lease holder can
/// acknowledge or extend, and an expired lease makes the message
/// reservable again.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a message with a generated id; returns the id.
    async fn send(&self, topic: &str, body: ActionMessage) -> Result<String>;

    /// Enqueue with a caller-supplied id. Idempotent: re-sending an
    /// existing id leaves the stored message untouched.
    async fn send_with_id(&self, topic: &str, id: &str, body: ActionMessage) -> Result<()>;

    /// Reserve the next reservable message on a topic for `pid`.
    ///
    /// # Errors
    /// `NoMessage` when nothing is reservable.
    async fn reserve_next(&self, topic: &str, pid: &str) -> Result<QueueMessage>;

    /// Acknowledge a reserved message. Idempotent once acknowledged.
    ///
    /// # Errors
    /// `NoMessage`, `WrongOwner`, `LeaseExpired`.
    async fn acknowledge(&self, id: &str, pid: &str) -> Result<()>;

    /// Push the lease deadline out to at least `now + lease_time`.
    ///
    /// # Errors
    /// `NoMessage`, `AlreadyAcknowledged`, `WrongOwner`, `LeaseExpired`.
    async fn extend_lease(&self, id: &str, pid: &str) -> Result<()>;

    /// List messages matching a filter, oldest first.
    async fn list(&self, filter: &MessageFilter) -> Result<Vec<QueueMessage>>;
}
