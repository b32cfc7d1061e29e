//! Error types for the patient data-access layer.
//!
//! `NotFound` and `Conflict` are ordinary outcomes that callers are expected to
//! handle; `ShardUnavailable` means a shard could not answer in time. Input
//! validation happens before requests reach this crate, so there is no
//! validation variant here.

use thiserror::Error;

use crate::database;
use crate::identity::PatientId;
use crate::shard::ShardIndex;

/// Primary error type for store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No record with this identifier exists on its owning shard
    #[error("patient {0} not found")]
    NotFound(PatientId),

    /// A contact value is already registered to another patient
    #[error("conflict: {0}")]
    Conflict(String),

    /// A shard connection could not be reached or timed out
    #[error("shard {shard} unavailable: {reason}")]
    ShardUnavailable {
        /// Shard that failed to answer
        shard: ShardIndex,
        /// Driver-level description
        reason: String,
    },

    /// A shard answered but the statement failed
    #[error("storage error on shard {shard}: {source}")]
    Storage {
        /// Shard that reported the error
        shard: ShardIndex,
        /// Underlying driver error
        #[source]
        source: database::Error,
    },

    /// Text that does not parse as a patient identifier
    #[error("invalid patient identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration validation and parsing errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal library errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new conflict error with the given message.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Creates a new configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Attributes a driver error to `shard`.
    ///
    /// Unreachable and timed-out connections become `ShardUnavailable` and a
    /// rejection by the contact-value unique index becomes `Conflict`. Anything
    /// else is `Storage`, including a primary-key collision, which means the
    /// identifier generator handed out an id that is already stored.
    pub fn from_shard(shard: ShardIndex, err: database::Error) -> Self {
        match err {
            e if e.is_unavailable() => Error::ShardUnavailable {
                shard,
                reason: e.to_string(),
            },
            database::Error::UniqueViolation(msg) => Error::Conflict(format!(
                "contact value already registered on shard {}: {}",
                shard, msg
            )),
            source => Error::Storage { shard, source },
        }
    }

    /// Whether this is an expected outcome rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_creation() {
        let err = Error::conflict("duplicate phone");
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_expected());

        let err = Error::config("missing endpoint");
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_expected());

        let err = Error::internal("worker panicked");
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_shard_attribution() {
        let shard = ShardIndex(1);

        let err = Error::from_shard(shard, database::Error::Timeout(Duration::from_millis(10)));
        assert!(matches!(err, Error::ShardUnavailable { shard: ShardIndex(1), .. }));

        let err = Error::from_shard(shard, database::Error::Connection("refused".into()));
        assert!(matches!(err, Error::ShardUnavailable { .. }));

        let err = Error::from_shard(shard, database::Error::UniqueViolation("value".into()));
        assert!(matches!(err, Error::Conflict(_)));

        let err = Error::from_shard(shard, database::Error::DuplicateKey("patients.patient_id".into()));
        assert!(matches!(err, Error::Storage { shard: ShardIndex(1), .. }));
        assert!(!err.is_expected());

        let err = Error::from_shard(shard, database::Error::Query("syntax".into()));
        assert!(matches!(err, Error::Storage { shard: ShardIndex(1), .. }));
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotFound(PatientId::Sequential(9));
        assert_eq!(err.to_string(), "patient 9 not found");

        let err = Error::ShardUnavailable {
            shard: ShardIndex(0),
            reason: "Timed out after 100ms".into(),
        };
        assert_eq!(err.to_string(), "shard 0 unavailable: Timed out after 100ms");
    }
}
