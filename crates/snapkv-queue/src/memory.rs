//! In-memory task queue
//!
//! Reference implementation. Reservation snapshots candidates under a
//! read lock and claims one with a compare-and-set under the write
//! lock, restarting selection when it loses the race, so contention
//! behaves like the remote backend's.

use crate::message::{
    check_acknowledge, check_extend, extended_deadline, ActionMessage, MessageFilter, QueueMessage,
};
use crate::queue::{TaskQueue, RESERVE_ATTEMPTS, RESERVE_CANDIDATES};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use snapkv_common::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

struct Stored {
    message: QueueMessage,
    ver: u64,
}

/// In-memory task queue
pub struct MemoryTaskQueue {
    messages: RwLock<HashMap<String, Stored>>,
    lease_time: chrono::Duration,
}

impl MemoryTaskQueue {
    /// Create a queue with the given lease time.
    #[must_use]
    pub fn new(lease_time: Duration) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            lease_time: chrono::Duration::from_std(lease_time)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    fn insert(&self, topic: &str, id: String, body: ActionMessage) -> bool {
        let mut messages = self.messages.write();
        if messages.contains_key(&id) {
            return false;
        }
        let message = QueueMessage {
            id: id.clone(),
            topic: topic.to_string(),
            timestamp: Utc::now(),
            body,
            pid: None,
            lease_deadline: None,
            ack: false,
        };
        messages.insert(id, Stored { message, ver: 1 });
        true
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn send(&self, topic: &str, body: ActionMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert(topic, id.clone(), body);
        Ok(id)
    }

    async fn send_with_id(&self, topic: &str, id: &str, body: ActionMessage) -> Result<()> {
        if !self.insert(topic, id.to_string(), body) {
            debug!(id, "send_with_id hit existing message, leaving it untouched");
        }
        Ok(())
    }

    async fn reserve_next(&self, topic: &str, pid: &str) -> Result<QueueMessage> {
        for _ in 0..RESERVE_ATTEMPTS {
            let now = Utc::now();

            // selection: earliest reservable messages, bounded window
            let mut candidates: Vec<(String, u64, chrono::DateTime<Utc>)> = {
                let messages = self.messages.read();
                messages
                    .values()
                    .filter(|s| s.message.topic == topic && s.message.reservable_at(now))
                    .map(|s| (s.message.id.clone(), s.ver, s.message.timestamp))
                    .collect()
            };
            candidates.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
            candidates.truncate(RESERVE_CANDIDATES);

            if candidates.is_empty() {
                return Err(Error::NoMessage(topic.to_string()));
            }

            let mut lost_race = false;
            for (id, expected, _) in candidates {
                let mut messages = self.messages.write();
                let Some(stored) = messages.get_mut(&id) else {
                    continue;
                };
                if stored.ver != expected {
                    lost_race = true;
                    continue;
                }
                stored.message.pid = Some(pid.to_string());
                stored.message.lease_deadline = Some(now + self.lease_time);
                stored.ver += 1;
                return Ok(stored.message.clone());
            }
            if !lost_race {
                return Err(Error::NoMessage(topic.to_string()));
            }
            // someone else claimed our candidates; select again
        }
        Err(Error::NoMessage(topic.to_string()))
    }

    async fn acknowledge(&self, id: &str, pid: &str) -> Result<()> {
        let now = Utc::now();
        let mut messages = self.messages.write();
        let stored = messages
            .get_mut(id)
            .ok_or_else(|| Error::NoMessage(id.to_string()))?;
        if check_acknowledge(&stored.message, pid, now)? {
            return Ok(());
        }
        stored.message.ack = true;
        stored.ver += 1;
        Ok(())
    }

    async fn extend_lease(&self, id: &str, pid: &str) -> Result<()> {
        let now = Utc::now();
        let mut messages = self.messages.write();
        let stored = messages
            .get_mut(id)
            .ok_or_else(|| Error::NoMessage(id.to_string()))?;
        check_extend(&stored.message, pid, now)?;
        stored.message.lease_deadline =
            Some(extended_deadline(&stored.message, now, self.lease_time));
        stored.ver += 1;
        Ok(())
    }

    async fn list(&self, filter: &MessageFilter) -> Result<Vec<QueueMessage>> {
        let now = Utc::now();
        let messages = self.messages.read();
        let mut matching: Vec<QueueMessage> = messages
            .values()
            .filter(|s| filter.matches(&s.message, now))
            .map(|s| s.message.clone())
            .collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatusFilter;
    use snapkv_common::types::VersionId;

    fn body() -> ActionMessage {
        ActionMessage::Prepare {
            version_id: VersionId::new(),
        }
    }

    fn queue() -> MemoryTaskQueue {
        MemoryTaskQueue::new(Duration::from_secs(60))
    }

    fn short_queue() -> MemoryTaskQueue {
        MemoryTaskQueue::new(Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_reserve_then_extend_then_ack() {
        let queue = queue();
        let id = queue.send("ops", body()).await.unwrap();

        let reserved = queue.reserve_next("ops", "worker-a").await.unwrap();
        assert_eq!(reserved.id, id);
        assert_eq!(reserved.pid.as_deref(), Some("worker-a"));

        queue.extend_lease(&id, "worker-a").await.unwrap();
        queue.acknowledge(&id, "worker-a").await.unwrap();

        // acknowledged messages are never reserved again
        let err = queue.reserve_next("ops", "worker-a").await.unwrap_err();
        assert_eq!(err.kind(), "no-message");
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let queue = queue();
        let id = queue.send("ops", body()).await.unwrap();
        queue.reserve_next("ops", "a").await.unwrap();
        queue.acknowledge(&id, "a").await.unwrap();
        // second ack returns ok, even from a different pid
        queue.acknowledge(&id, "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_empty_topic() {
        let queue = queue();
        let err = queue.reserve_next("ops", "a").await.unwrap_err();
        assert_eq!(err.kind(), "no-message");
    }

    #[tokio::test]
    async fn test_wrong_owner_rejected() {
        let queue = queue();
        let id = queue.send("ops", body()).await.unwrap();
        queue.reserve_next("ops", "a").await.unwrap();

        assert_eq!(
            queue.acknowledge(&id, "b").await.unwrap_err().kind(),
            "wrong-owner"
        );
        assert_eq!(
            queue.extend_lease(&id, "b").await.unwrap_err().kind(),
            "wrong-owner"
        );
    }

    #[tokio::test]
    async fn test_missing_message() {
        let queue = queue();
        assert_eq!(
            queue.acknowledge("ghost", "a").await.unwrap_err().kind(),
            "no-message"
        );
        assert_eq!(
            queue.extend_lease("ghost", "a").await.unwrap_err().kind(),
            "no-message"
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_rereservable_with_same_body() {
        let queue = short_queue();
        let sent = body();
        let id = queue.send("ops", sent.clone()).await.unwrap();

        let first = queue.reserve_next("ops", "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = queue.reserve_next("ops", "b").await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.body, sent);
        assert_eq!(second.body, first.body);

        // the original holder lost its lease
        assert_eq!(
            queue.acknowledge(&id, "a").await.unwrap_err().kind(),
            "lease-expired"
        );
        queue.acknowledge(&id, "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_extend_rejected_after_ack() {
        let queue = queue();
        let id = queue.send("ops", body()).await.unwrap();
        queue.reserve_next("ops", "a").await.unwrap();
        queue.acknowledge(&id, "a").await.unwrap();
        assert_eq!(
            queue.extend_lease(&id, "a").await.unwrap_err().kind(),
            "already-acknowledged"
        );
    }

    #[tokio::test]
    async fn test_fifo_preference() {
        let queue = queue();
        let first = queue.send("ops", body()).await.unwrap();
        let second = queue.send("ops", body()).await.unwrap();

        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, first);
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, second);
    }

    #[tokio::test]
    async fn test_later_message_reserved_when_earlier_are_leased() {
        let queue = queue();
        for _ in 0..3 {
            queue.send("ops", body()).await.unwrap();
        }
        // lease the three earliest
        for _ in 0..3 {
            queue.reserve_next("ops", "a").await.unwrap();
        }
        let late = queue.send("ops", body()).await.unwrap();
        assert_eq!(queue.reserve_next("ops", "b").await.unwrap().id, late);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let queue = queue();
        queue.send("other", body()).await.unwrap();
        assert_eq!(
            queue.reserve_next("ops", "a").await.unwrap_err().kind(),
            "no-message"
        );
    }

    #[tokio::test]
    async fn test_send_with_id_is_idempotent() {
        let queue = queue();
        let first = body();
        queue.send_with_id("ops", "fixed", first.clone()).await.unwrap();
        queue.send_with_id("ops", "fixed", body()).await.unwrap();

        let all = queue.list(&MessageFilter::topic("ops")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body, first);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let queue = short_queue();
        let new_id = queue.send("ops", body()).await.unwrap();
        let reserved_id = queue.send("ops", body()).await.unwrap();
        let acked_id = queue.send("ops", body()).await.unwrap();
        let expired_id = queue.send("ops", body()).await.unwrap();

        // the earliest is reserved first; shape the rest explicitly
        assert_eq!(queue.reserve_next("ops", "x").await.unwrap().id, new_id);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // new_id is expired now; claim and shape the others
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, new_id);
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, reserved_id);
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, acked_id);
        assert_eq!(queue.reserve_next("ops", "b").await.unwrap().id, expired_id);
        queue.acknowledge(&acked_id, "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        // every unacked lease has lapsed; an expired lease cannot be extended
        assert_eq!(
            queue.extend_lease(&new_id, "a").await.unwrap_err().kind(),
            "lease-expired"
        );
        // re-reserve the two earliest so they read as reserved below
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, new_id);
        assert_eq!(queue.reserve_next("ops", "a").await.unwrap().id, reserved_id);

        let now_new = queue
            .list(&MessageFilter::topic("ops").with_status(StatusFilter::New))
            .await
            .unwrap();
        assert!(now_new.is_empty());

        let reserved = queue
            .list(&MessageFilter::topic("ops").with_status(StatusFilter::Reserved))
            .await
            .unwrap();
        assert_eq!(
            reserved.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec![new_id.as_str(), reserved_id.as_str()]
        );

        let acked = queue
            .list(&MessageFilter::topic("ops").with_status(StatusFilter::Acknowledged))
            .await
            .unwrap();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].id, acked_id);

        let expired = queue
            .list(&MessageFilter::topic("ops").with_status(StatusFilter::Expired))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, expired_id);

        let by_pid = queue
            .list(&MessageFilter::topic("ops").with_pid("b"))
            .await
            .unwrap();
        assert_eq!(by_pid.len(), 1);
        assert_eq!(by_pid[0].id, expired_id);
    }
}
