//! Dirty list for alerts whose underlying events were edited.
//!
//! Edits never trigger a recompute directly. They flag affected unresolved
//! alerts as stale and leave an entry here; the next recompute consumes it.

use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::enums::SymptomKind;
use crate::models::DedupKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invalidation {
    pub id: i64,
    /// `None` matches every symptom type.
    pub symptom: Option<SymptomKind>,
    /// `None` matches every treatment.
    pub subject: Option<String>,
    pub marked_at: NaiveDateTime,
}

pub fn invalidate_symptom(
    conn: &Connection,
    user_id: i64,
    symptom: SymptomKind,
    now: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO alert_invalidations (user_id, symptom, subject, marked_at)
         VALUES (?1, ?2, '', ?3)",
        params![user_id, symptom.as_str(), format_timestamp(now)],
    )?;
    conn.execute(
        "UPDATE alerts SET stale = 1
         WHERE user_id = ?1 AND resolved_at IS NULL
           AND (dedup_symptom = ?2 OR dedup_subject = ?3)",
        params![
            user_id,
            symptom.as_str(),
            DedupKey::symptom_subject(symptom),
        ],
    )?;
    Ok(())
}

pub fn invalidate_treatment(
    conn: &Connection,
    user_id: i64,
    name: &str,
    now: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO alert_invalidations (user_id, symptom, subject, marked_at)
         VALUES (?1, '', ?2, ?3)",
        params![user_id, name, format_timestamp(now)],
    )?;
    conn.execute(
        "UPDATE alerts SET stale = 1
         WHERE user_id = ?1 AND resolved_at IS NULL AND dedup_subject = ?2",
        params![user_id, name],
    )?;
    Ok(())
}

pub fn get_invalidations(
    conn: &Connection,
    user_id: i64,
) -> Result<Vec<Invalidation>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, symptom, subject, marked_at FROM alert_invalidations
         WHERE user_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, symptom, subject, marked_at) = row?;
        entries.push(Invalidation {
            id,
            symptom: if symptom.is_empty() {
                None
            } else {
                Some(SymptomKind::from_str(&symptom)?)
            },
            subject: if subject.is_empty() { None } else { Some(subject) },
            marked_at: parse_timestamp(&marked_at)?,
        });
    }
    Ok(entries)
}

/// Drop entries up to and including `up_to_id`. Returns how many were removed.
pub fn clear_invalidations(
    conn: &Connection,
    user_id: i64,
    up_to_id: i64,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM alert_invalidations WHERE user_id = ?1 AND id <= ?2",
        params![user_id, up_to_id],
    )?;
    Ok(removed)
}
