//! Document-store queue backend
//!
//! Messages are keyed by id and carry a
//! `{topic}#{N|R|A}#{zero-padded-millis}` sort key encoding the three
//! mutually exclusive status flags, so "find next reservable" is two
//! ordered prefix queries (`N#` for never-reserved, `R#` for leased,
//! filtered to expired leases client side). Reservation and
//! acknowledgement are conditional writes on the per-message counter;
//! a lost race restarts selection from scratch.

use crate::message::{
    check_acknowledge, check_extend, extended_deadline, ActionMessage, MessageFilter, QueueMessage,
};
use crate::queue::{TaskQueue, RESERVE_ATTEMPTS, RESERVE_CANDIDATES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snapkv_common::document::{Document, DocumentStore};
use snapkv_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const FLAG_NEW: char = 'N';
const FLAG_RESERVED: char = 'R';
const FLAG_ACKED: char = 'A';

/// Task queue on top of a document database
pub struct DocumentTaskQueue {
    client: Arc<dyn DocumentStore>,
    table: String,
    lease_time: chrono::Duration,
}

impl DocumentTaskQueue {
    #[must_use]
    pub fn new(client: Arc<dyn DocumentStore>, table: impl Into<String>, lease_time: Duration) -> Self {
        Self {
            client,
            table: table.into(),
            lease_time: chrono::Duration::from_std(lease_time)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    fn flag(message: &QueueMessage) -> char {
        if message.ack {
            FLAG_ACKED
        } else if message.pid.is_none() {
            FLAG_NEW
        } else {
            FLAG_RESERVED
        }
    }

    fn sort_key(message: &QueueMessage) -> String {
        format!(
            "{}#{}#{:020}",
            message.topic,
            Self::flag(message),
            message.timestamp.timestamp_millis()
        )
    }

    fn encode(message: &QueueMessage) -> Result<Document> {
        let body = serde_json::to_value(message)
            .map_err(|e| Error::internal(format!("encode message: {e}")))?;
        Ok(Document::new(message.id.clone(), body).with_sort_key(Self::sort_key(message)))
    }

    fn decode(doc: &Document) -> Result<QueueMessage> {
        serde_json::from_value(doc.body.clone())
            .map_err(|e| Error::internal(format!("corrupt message record {}: {e}", doc.key)))
    }

    async fn get_message(&self, id: &str) -> Result<(QueueMessage, u64)> {
        let doc = self
            .client
            .get(&self.table, id)
            .await?
            .ok_or_else(|| Error::NoMessage(id.to_string()))?;
        Ok((Self::decode(&doc)?, doc.ver))
    }

    async fn write_message(&self, message: &QueueMessage, expected: u64) -> Result<()> {
        self.client
            .put(&self.table, Self::encode(message)?, Some(expected))
            .await
            .map_err(|e| match e {
                Error::Conflict { .. } => Error::Conflict {
                    entity: "message",
                    id: message.id.clone(),
                },
                other => other,
            })?;
        Ok(())
    }

    /// Earliest reservable messages on a topic at instant `now`.
    async fn candidates(
        &self,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(QueueMessage, u64)>> {
        let new_docs = self
            .client
            .query_sorted(
                &self.table,
                &format!("{topic}#{FLAG_NEW}#"),
                RESERVE_CANDIDATES,
            )
            .await?;
        let reserved_docs = self
            .client
            .query_sorted(
                &self.table,
                &format!("{topic}#{FLAG_RESERVED}#"),
                RESERVE_CANDIDATES,
            )
            .await?;

        let mut reservable = Vec::new();
        for doc in new_docs.iter().chain(reserved_docs.iter()) {
            let message = Self::decode(doc)?;
            if message.reservable_at(now) {
                reservable.push((message, doc.ver));
            }
        }
        reservable.sort_by(|a, b| {
            a.0.timestamp
                .cmp(&b.0.timestamp)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        reservable.truncate(RESERVE_CANDIDATES);
        Ok(reservable)
    }
}

#[async_trait]
impl TaskQueue for DocumentTaskQueue {
    async fn send(&self, topic: &str, body: ActionMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.send_with_id(topic, &id, body).await?;
        Ok(id)
    }

    async fn send_with_id(&self, topic: &str, id: &str, body: ActionMessage) -> Result<()> {
        if self.client.get(&self.table, id).await?.is_some() {
            debug!(id, "send_with_id hit existing message, leaving it untouched");
            return Ok(());
        }
        let message = QueueMessage {
            id: id.to_string(),
            topic: topic.to_string(),
            timestamp: Utc::now(),
            body,
            pid: None,
            lease_deadline: None,
            ack: false,
        };
        match self.client.put(&self.table, Self::encode(&message)?, None).await {
            // lost an insert race against the same id: already sent
            Err(Error::Conflict { .. }) | Ok(_) => Ok(()),
            Err(other) => Err(other),
        }
    }

    async fn reserve_next(&self, topic: &str, pid: &str) -> Result<QueueMessage> {
        for _ in 0..RESERVE_ATTEMPTS {
            let now = Utc::now();
            let candidates = self.candidates(topic, now).await?;
            if candidates.is_empty() {
                return Err(Error::NoMessage(topic.to_string()));
            }

            let mut lost_race = false;
            for (mut message, expected) in candidates {
                message.pid = Some(pid.to_string());
                message.lease_deadline = Some(now + self.lease_time);
                match self.write_message(&message, expected).await {
                    Ok(()) => return Ok(message),
                    Err(e) if e.is_conflict() => {
                        lost_race = true;
                    }
                    Err(other) => return Err(other),
                }
            }
            if !lost_race {
                return Err(Error::NoMessage(topic.to_string()));
            }
        }
        Err(Error::NoMessage(topic.to_string()))
    }

    async fn acknowledge(&self, id: &str, pid: &str) -> Result<()> {
        let now = Utc::now();
        let (mut message, expected) = self.get_message(id).await?;
        if check_acknowledge(&message, pid, now)? {
            return Ok(());
        }
        message.ack = true;
        self.write_message(&message, expected).await
    }

    async fn extend_lease(&self, id: &str, pid: &str) -> Result<()> {
        let now = Utc::now();
        let (mut message, expected) = self.get_message(id).await?;
        check_extend(&message, pid, now)?;
        message.lease_deadline = Some(extended_deadline(&message, now, self.lease_time));
        self.write_message(&message, expected).await
    }

    async fn list(&self, filter: &MessageFilter) -> Result<Vec<QueueMessage>> {
        let now = Utc::now();
        let docs = self.client.scan(&self.table).await?;
        let mut matching = Vec::new();
        for doc in &docs {
            let message = Self::decode(doc)?;
            if filter.matches(&message, now) {
                matching.push(message);
            }
        }
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}
