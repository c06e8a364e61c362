use std::time::Duration;

use thiserror::Error;

use crate::db::StructuredError;
use crate::negotiate::BackendVersionTag;

/// Errors surfaced by the adaptation layer.
///
/// Capability mismatches are never errors (they are `false` answers from
/// [`crate::capability::CapabilitySet::capability`]) and suppressed statements
/// are successes, so neither appears here.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A connection parameter that is kept for the driver has a malformed value.
    #[error("invalid connection parameter `{key}`: {reason}")]
    Configuration { key: String, reason: String },

    #[error("unknown backend profile `{0}`")]
    UnknownBackend(String),

    #[error("backend version {reported} is older than the minimum supported {minimum}")]
    UnsupportedVersion {
        reported: BackendVersionTag,
        minimum: BackendVersionTag,
    },

    #[error("failed to parse backend profiles: {0}")]
    Profile(#[from] toml::de::Error),

    #[error("{}", .0.display_full())]
    Database(StructuredError),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot decode value of type {oid}: {reason}")]
    Decode { oid: u32, reason: String },
}

impl AdapterError {
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(oid: u32, reason: impl Into<String>) -> Self {
        AdapterError::Decode {
            oid,
            reason: reason.into(),
        }
    }

    /// Wrap a driver error together with the SQL that caused it.
    pub fn database(err: &tokio_postgres::Error, sql: &str) -> Self {
        AdapterError::Database(StructuredError::from_pg_error(err, sql))
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message() {
        let err = AdapterError::configuration("port", "must be between 1 and 65535");
        assert_eq!(
            err.to_string(),
            "invalid connection parameter `port`: must be between 1 and 65535"
        );
    }

    #[test]
    fn test_unsupported_version_message() {
        let err = AdapterError::UnsupportedVersion {
            reported: BackendVersionTag::new(80002),
            minimum: BackendVersionTag::new(80200),
        };
        assert_eq!(
            err.to_string(),
            "backend version 8.0 is older than the minimum supported 8.2"
        );
    }

    #[test]
    fn test_database_error_uses_full_display() {
        let err = AdapterError::Database(StructuredError::from_string("relation missing".into()));
        assert!(err.to_string().contains("relation missing"));
    }
}
