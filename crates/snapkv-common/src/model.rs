//! Dataset and version records, and the version status state machine
//!
//! The state machine is the central artifact of the system: every status
//! mutation anywhere in SnapKV goes through [`VersionStatus::can_transition_to`].

use crate::types::{ContentType, DatasetName, EvictionPolicy, TableName, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Free-form audit context supplied by callers of mutating operations.
pub type Audit = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a dataset version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionStatus {
    Preparing,
    AwaitingEntries,
    Saving,
    Saved,
    Publishing,
    Published,
    Discarded,
    Failed,
}

impl VersionStatus {
    /// Allowed transition targets from this status.
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [VersionStatus] {
        use VersionStatus::*;
        match self {
            Preparing => &[AwaitingEntries, Discarded, Failed],
            AwaitingEntries => &[Saving, Discarded, Failed],
            Saving => &[Saved, Discarded, Failed],
            Saved => &[Publishing, Published, Discarded, Failed],
            Publishing => &[Published, Discarded, Failed],
            Published => &[Saved],
            Discarded | Failed => &[],
        }
    }

    /// Whether the edge `self -> target` exists in the state graph.
    #[must_use]
    pub fn can_transition_to(self, target: VersionStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Discarded | Self::Failed)
    }

    /// Kebab-case name, matching the wire encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::AwaitingEntries => "awaiting-entries",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Discarded => "discarded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record in an append-only operation log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Audit::is_empty")]
    pub detail: Audit,
}

impl AuditRecord {
    /// Create a record stamped with the current time.
    pub fn now(action: impl Into<String>, detail: Audit) -> Self {
        Self {
            action: action.into(),
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// A named collection of tables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: DatasetName,
    pub tables: BTreeSet<TableName>,
    #[serde(rename = "content-type", default)]
    pub content_type: ContentType,
    #[serde(rename = "eviction-policy", default)]
    pub eviction_policy: EvictionPolicy,
    #[serde(rename = "active-version", default)]
    pub active_version: Option<VersionId>,
    #[serde(rename = "operation-log", default)]
    pub operation_log: Vec<AuditRecord>,
}

impl Dataset {
    #[must_use]
    pub fn has_table(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }
}

/// One immutable staging area for a dataset's contents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    #[serde(default)]
    pub label: Option<String>,
    pub dataset: DatasetName,
    pub status: VersionStatus,
    #[serde(rename = "verification-policy", default)]
    pub verification_policy: Option<Audit>,
    #[serde(rename = "operation-log", default)]
    pub operation_log: Vec<AuditRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use VersionStatus::*;

    const ALL: [VersionStatus; 8] = [
        Preparing,
        AwaitingEntries,
        Saving,
        Saved,
        Publishing,
        Published,
        Discarded,
        Failed,
    ];

    #[test]
    fn test_allowed_edges() {
        assert!(Preparing.can_transition_to(AwaitingEntries));
        assert!(AwaitingEntries.can_transition_to(Saving));
        assert!(Saving.can_transition_to(Saved));
        assert!(Saved.can_transition_to(Publishing));
        assert!(Saved.can_transition_to(Published));
        assert!(Publishing.can_transition_to(Published));
        // hand-off edge used when another version is promoted
        assert!(Published.can_transition_to(Saved));
    }

    #[test]
    fn test_every_non_terminal_can_discard_and_fail_except_published() {
        for from in [Preparing, AwaitingEntries, Saving, Saved, Publishing] {
            assert!(from.can_transition_to(Discarded), "{from} -> discarded");
            assert!(from.can_transition_to(Failed), "{from} -> failed");
        }
        assert!(!Published.can_transition_to(Discarded));
        assert!(!Published.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for target in ALL {
            assert!(!Discarded.can_transition_to(target));
            assert!(!Failed.can_transition_to(target));
        }
        assert!(Discarded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Published.is_terminal());
    }

    #[test]
    fn test_rejected_edges() {
        assert!(!Preparing.can_transition_to(Saved));
        assert!(!Preparing.can_transition_to(Published));
        assert!(!AwaitingEntries.can_transition_to(Published));
        assert!(!Saving.can_transition_to(Publishing));
        assert!(!Published.can_transition_to(Publishing));
        // no self-loops anywhere
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s} -> {s} must be rejected");
        }
    }

    #[test]
    fn test_status_wire_encoding() {
        let json = serde_json::to_string(&AwaitingEntries).unwrap();
        assert_eq!(json, "\"awaiting-entries\"");
        let back: VersionStatus = serde_json::from_str("\"awaiting-entries\"").unwrap();
        assert_eq!(back, AwaitingEntries);
        assert_eq!(AwaitingEntries.to_string(), "awaiting-entries");
    }

    #[test]
    fn test_version_serde_round_trip() {
        let version = Version {
            id: VersionId::new(),
            label: Some("nightly".to_string()),
            dataset: DatasetName::new_unchecked("recs"),
            status: Preparing,
            verification_policy: None,
            operation_log: vec![AuditRecord::now("created", Audit::new())],
        };
        let json = serde_json::to_string(&version).unwrap();
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(version, back);
    }
}
