pub mod sqlite;
pub mod repository;

pub use sqlite::*;
pub use repository::*;

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// True when SQLite rejected a write because of a UNIQUE index or a busy lock,
    /// i.e. another writer got there first.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::ConstraintViolation
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Storage format for every timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn timestamp_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2025, 8, 20)
            .unwrap()
            .and_hms_opt(15, 40, 59)
            .unwrap();
        let raw = format_timestamp(&ts);
        assert_eq!(raw, "2025-08-20 15:40:59");
        assert_eq!(parse_timestamp(&raw).unwrap(), ts);
    }

    #[test]
    fn malformed_timestamp_rejected() {
        assert!(parse_timestamp("20/08/2025").is_err());
    }

    #[test]
    fn not_found_is_not_a_conflict() {
        let err = DatabaseError::NotFound {
            entity_type: "Alert".into(),
            id: "1".into(),
        };
        assert!(!err.is_write_conflict());
    }
}
