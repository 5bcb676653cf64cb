//! Error types for SnapKV
//!
//! One error enum covers every failure the core can surface. Each
//! variant carries a stable kind tag (used as the `error` field of HTTP
//! error bodies) and maps to exactly one HTTP status.

use crate::model::{Version, VersionStatus};
use crate::types::{DatasetName, NameError, TableRef, VersionId};
use thiserror::Error;

/// Common result type for SnapKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for SnapKV
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("{0}")]
    Validation(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: VersionStatus,
        to: VersionStatus,
    },

    #[error("version {} is {}, expected {}", .version.id, .version.status, .expected)]
    InvalidVersionState {
        version: Box<Version>,
        expected: VersionStatus,
    },

    #[error("version {} belongs to dataset {}, not {}", .version.id, .version.dataset, .requested)]
    InvalidVersionForDataset {
        version: Box<Version>,
        requested: DatasetName,
    },

    #[error("dataset {0} has no active version")]
    NoActiveVersion(DatasetName),

    #[error("batch of {got} entries exceeds the limit of {limit}")]
    BatchTooLarge { got: usize, limit: usize },

    #[error("batch must not be empty")]
    EmptyBatch,

    // Not-found errors
    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetName),

    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("tables not found: {missing:?}")]
    TablesNotFound { missing: Vec<TableRef> },

    // Conflicts
    #[error("dataset already exists: {0}")]
    DatasetAlreadyExists(DatasetName),

    #[error("concurrent modification of {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    // Queue errors
    #[error("no message available on topic {0}")]
    NoMessage(String),

    #[error("message {id} is leased by {owner}, not {caller}")]
    WrongOwner {
        id: String,
        owner: String,
        caller: String,
    },

    #[error("lease expired on message {0}")]
    LeaseExpired(String),

    #[error("message already acknowledged: {0}")]
    AlreadyAcknowledged(String),

    // Backend errors
    #[error("backend rate limited: {0}")]
    TooManyRequests(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Stable kind tag, surfaced as the `error` field of HTTP error bodies
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid-name",
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::InvalidVersionState { .. } => "invalid-version-state",
            Self::InvalidVersionForDataset { .. } => "invalid-version-for-dataset",
            Self::NoActiveVersion(_) => "no-active-version",
            Self::BatchTooLarge { .. } => "batch-too-large",
            Self::EmptyBatch => "empty-batch",
            Self::DatasetNotFound(_) => "dataset-not-found",
            Self::VersionNotFound(_) => "version-not-found",
            Self::KeyNotFound(_) => "key-not-found",
            Self::TablesNotFound { .. } => "tables-not-found",
            Self::DatasetAlreadyExists(_) => "already-exists",
            Self::Conflict { .. } => "conflict",
            Self::NoMessage(_) => "no-message",
            Self::WrongOwner { .. } => "wrong-owner",
            Self::LeaseExpired(_) => "lease-expired",
            Self::AlreadyAcknowledged(_) => "already-acknowledged",
            Self::TooManyRequests(_) => "too-many-requests",
            Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code for the API adapter
    ///
    /// Duplicate dataset creation maps to 400 (not 409); the only 409
    /// sources are optimistic-concurrency failures and queue ownership
    /// violations.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidName(_)
            | Self::Validation(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidVersionState { .. }
            | Self::InvalidVersionForDataset { .. }
            | Self::NoActiveVersion(_)
            | Self::BatchTooLarge { .. }
            | Self::EmptyBatch
            | Self::DatasetAlreadyExists(_) => 400,

            Self::DatasetNotFound(_)
            | Self::VersionNotFound(_)
            | Self::KeyNotFound(_)
            | Self::TablesNotFound { .. }
            | Self::NoMessage(_) => 404,

            Self::Conflict { .. }
            | Self::WrongOwner { .. }
            | Self::LeaseExpired(_)
            | Self::AlreadyAcknowledged(_) => 409,

            Self::TooManyRequests(_) => 429,

            Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Check if this is a not-found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DatasetNotFound(_)
                | Self::VersionNotFound(_)
                | Self::KeyNotFound(_)
                | Self::TablesNotFound { .. }
        )
    }

    /// Check if this is an optimistic-concurrency failure the caller may
    /// retry
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Version;
    use crate::types::TableName;

    fn version(status: VersionStatus) -> Box<Version> {
        Box::new(Version {
            id: VersionId::new(),
            label: None,
            dataset: DatasetName::new_unchecked("recs"),
            status,
            verification_policy: None,
            operation_log: Vec::new(),
        })
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::validation("bad shape").http_status_code(),
            400
        );
        assert_eq!(
            Error::DatasetAlreadyExists(DatasetName::new_unchecked("recs")).http_status_code(),
            400
        );
        assert_eq!(
            Error::VersionNotFound(VersionId::new()).http_status_code(),
            404
        );
        assert_eq!(
            Error::Conflict {
                entity: "version",
                id: "v1".to_string()
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            Error::TooManyRequests("throttled".to_string()).http_status_code(),
            429
        );
        assert_eq!(Error::internal("boom").http_status_code(), 500);
    }

    #[test]
    fn test_kind_tags() {
        let err = Error::InvalidVersionState {
            version: version(VersionStatus::Preparing),
            expected: VersionStatus::AwaitingEntries,
        };
        assert_eq!(err.kind(), "invalid-version-state");
        assert_eq!(err.http_status_code(), 400);

        let err = Error::TablesNotFound {
            missing: vec![TableRef {
                dataset: DatasetName::new_unchecked("recs"),
                table: TableName::new_unchecked("ghost"),
            }],
        };
        assert_eq!(err.kind(), "tables-not-found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_queue_error_statuses() {
        assert_eq!(Error::NoMessage("ops".to_string()).http_status_code(), 404);
        assert_eq!(
            Error::LeaseExpired("m1".to_string()).http_status_code(),
            409
        );
        assert_eq!(
            Error::AlreadyAcknowledged("m1".to_string()).http_status_code(),
            409
        );
    }
}
