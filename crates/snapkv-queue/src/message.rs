//! Queue message types and the shared acknowledgement rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapkv_common::types::VersionId;
use snapkv_common::{Error, Result};

/// Action carried by a queue message
///
/// The worker dispatches on the variant; the wire shape carries the
/// action as a tag so other consumers can filter without a full decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionMessage {
    #[serde(rename_all = "kebab-case")]
    Prepare { version_id: VersionId },
    #[serde(rename_all = "kebab-case")]
    Save { version_id: VersionId },
    #[serde(rename_all = "kebab-case")]
    Publish { version_id: VersionId },
    #[serde(rename_all = "kebab-case")]
    Discard {
        version_id: VersionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "kebab-case")]
    Fail {
        version_id: VersionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "kebab-case")]
    VerifyData { version_id: VersionId },
}

impl ActionMessage {
    /// The version this action operates on.
    #[must_use]
    pub const fn version_id(&self) -> VersionId {
        match self {
            Self::Prepare { version_id }
            | Self::Save { version_id }
            | Self::Publish { version_id }
            | Self::Discard { version_id, .. }
            | Self::Fail { version_id, .. }
            | Self::VerifyData { version_id } => *version_id,
        }
    }

    /// Wire name of the action, for logging.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Prepare { .. } => "prepare",
            Self::Save { .. } => "save",
            Self::Publish { .. } => "publish",
            Self::Discard { .. } => "discard",
            Self::Fail { .. } => "fail",
            Self::VerifyData { .. } => "verify-data",
        }
    }
}

/// One message on the queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub body: ActionMessage,
    /// Process currently holding the lease; `None` before the first
    /// reservation.
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub lease_deadline: Option<DateTime<Utc>>,
    /// Terminal once true.
    #[serde(default)]
    pub ack: bool,
}

impl QueueMessage {
    /// Status of this message at instant `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> MessageStatus {
        if self.ack {
            MessageStatus::Acknowledged
        } else if self.pid.is_none() {
            MessageStatus::New
        } else if self.lease_deadline.is_some_and(|d| now <= d) {
            MessageStatus::Reserved
        } else {
            MessageStatus::Expired
        }
    }

    /// A message is reservable iff it is not acknowledged and holds no
    /// live lease.
    #[must_use]
    pub fn reservable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status_at(now),
            MessageStatus::New | MessageStatus::Expired
        )
    }
}

/// Mutually exclusive message statuses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    New,
    Reserved,
    Acknowledged,
    Expired,
}

/// Status filter for [`MessageFilter`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusFilter {
    #[default]
    All,
    New,
    Reserved,
    Acknowledged,
    Expired,
}

impl StatusFilter {
    #[must_use]
    pub fn matches(self, status: MessageStatus) -> bool {
        match self {
            Self::All => true,
            Self::New => status == MessageStatus::New,
            Self::Reserved => status == MessageStatus::Reserved,
            Self::Acknowledged => status == MessageStatus::Acknowledged,
            Self::Expired => status == MessageStatus::Expired,
        }
    }
}

/// Selection criteria for listing messages
#[derive(Clone, Debug)]
pub struct MessageFilter {
    pub topic: String,
    pub status: StatusFilter,
    pub pid: Option<String>,
}

impl MessageFilter {
    /// Filter on topic alone.
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            status: StatusFilter::All,
            pid: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    /// Whether a message satisfies the filter at instant `now`.
    #[must_use]
    pub fn matches(&self, message: &QueueMessage, now: DateTime<Utc>) -> bool {
        message.topic == self.topic
            && self.status.matches(message.status_at(now))
            && self.pid.as_ref().is_none_or(|p| message.pid.as_ref() == Some(p))
    }
}

/// Acknowledgement checks, in contract order. Returns `true` when the
/// message was already acknowledged (ack is idempotent and must
/// short-circuit before the ownership checks).
pub(crate) fn check_acknowledge(
    message: &QueueMessage,
    pid: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if message.ack {
        return Ok(true);
    }
    check_ownership(message, pid, now)?;
    Ok(false)
}

/// Extend-lease checks. Unlike ack, extending an acknowledged message
/// fails: a terminated message cannot be un-terminated.
pub(crate) fn check_extend(message: &QueueMessage, pid: &str, now: DateTime<Utc>) -> Result<()> {
    if message.ack {
        return Err(Error::AlreadyAcknowledged(message.id.clone()));
    }
    check_ownership(message, pid, now)
}

fn check_ownership(message: &QueueMessage, pid: &str, now: DateTime<Utc>) -> Result<()> {
    let owner = message.pid.as_deref().unwrap_or("");
    if owner != pid {
        return Err(Error::WrongOwner {
            id: message.id.clone(),
            owner: owner.to_string(),
            caller: pid.to_string(),
        });
    }
    if !message.lease_deadline.is_some_and(|d| now <= d) {
        return Err(Error::LeaseExpired(message.id.clone()));
    }
    Ok(())
}

/// New lease deadline on extension: never moves backwards.
pub(crate) fn extended_deadline(
    message: &QueueMessage,
    now: DateTime<Utc>,
    lease_time: chrono::Duration,
) -> DateTime<Utc> {
    let fresh = now + lease_time;
    match message.lease_deadline {
        Some(current) if current > fresh => current,
        _ => fresh,
    }
}
