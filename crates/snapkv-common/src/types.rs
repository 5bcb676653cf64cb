//! Core identifier types for SnapKV
//!
//! Dataset names, table names, and entry keys share one "web-safe"
//! alphabet (ASCII letters, digits, `-`, `_`, `.`), enforced at
//! construction. Version ids are opaque UUIDs.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length for web-safe names and keys, in bytes.
const MAX_NAME_LEN: usize = 255;

/// Errors that can occur when creating a web-safe name or key
#[derive(Debug, Clone, thiserror::Error)]
pub enum NameError {
    #[error("must not be empty")]
    Empty,
    #[error("must be at most {MAX_NAME_LEN} bytes")]
    TooLong,
    #[error("contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Validate the shared web-safe rule.
fn validate_web_safe(s: &str) -> Result<(), NameError> {
    if s.is_empty() {
        return Err(NameError::Empty);
    }
    if s.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    for c in s.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(NameError::InvalidChar(c));
        }
    }
    Ok(())
}

macro_rules! web_safe_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
        #[display("{_0}")]
        pub struct $name(String);

        impl $name {
            /// Create a new value, validating the web-safe rule.
            pub fn new(s: impl Into<String>) -> Result<Self, NameError> {
                let s = s.into();
                validate_web_safe(&s)?;
                Ok(Self(s))
            }

            /// Create without validation (internal use only)
            #[must_use]
            pub fn new_unchecked(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the value as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

web_safe_newtype!(
    /// Unique name of a dataset
    DatasetName
);

web_safe_newtype!(
    /// Name of a table within a dataset
    TableName
);

web_safe_newtype!(
    /// Key of an entry within a table
    EntryKey
);

/// Unique identifier for a dataset version
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Generate a new random version ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content type of the values stored in a dataset
///
/// Only `application/json` is recognized; the enum exists so the wire
/// shape stays open for future types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "application/json")]
    ApplicationJson,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::ApplicationJson
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationJson => write!(f, "application/json"),
        }
    }
}

/// Per-dataset eviction policy
///
/// Persisted and round-tripped; eviction itself is not executed by the
/// core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EvictionPolicy {
    KeepLastXVersions { versions: u32 },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::KeepLastXVersions { versions: 3 }
    }
}

impl EvictionPolicy {
    /// Check the policy parameters are in range.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::KeepLastXVersions { versions } => *versions >= 1,
        }
    }
}

/// Reference to a table within a dataset, used in error context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: DatasetName,
    pub table: TableName,
}
