//! Error types for the pattern-detection engine.
//!
//! There is no `InsufficientData` error: a pair without enough trials is
//! a `SkipReason`, not a failure.

use thiserror::Error;

use crate::db::DatabaseError;

/// Failures at the event-store seam.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    #[error("Concurrent write conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_write_conflict() {
            Self::Conflict(err.to_string())
        } else {
            Self::Database(err)
        }
    }
}

/// Run-level errors returned to the caller of a recompute.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Event fetch failed: {0}")]
    FetchFailure(String),

    #[error("Upsert conflict on {key}: {reason}")]
    UpsertConflict { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PatternError {
    /// Whether the caller may simply try the whole recompute again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailure(_) | Self::UpsertConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failure_is_retryable() {
        assert!(PatternError::FetchFailure("timeout".into()).is_retryable());
        assert!(!PatternError::Configuration("lo >= hi".into()).is_retryable());
    }

    #[test]
    fn plain_database_error_is_not_a_conflict() {
        let err = StoreError::from(DatabaseError::Serialization("bad json".into()));
        assert!(matches!(err, StoreError::Database(_)));
    }
}
