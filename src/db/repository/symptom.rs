use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::enums::SymptomKind;
use crate::models::*;

use super::invalidation::invalidate_symptom;

fn check_severity(severity: u8) -> Result<(), DatabaseError> {
    if severity > MAX_SYMPTOM_SEVERITY {
        return Err(DatabaseError::ConstraintViolation(format!(
            "symptom severity {severity} outside 0-{MAX_SYMPTOM_SEVERITY}"
        )));
    }
    Ok(())
}

pub fn insert_symptom_event(
    conn: &Connection,
    user_id: i64,
    event: &NewSymptomEvent,
) -> Result<SymptomEvent, DatabaseError> {
    check_severity(event.severity)?;
    conn.execute(
        "INSERT INTO symptom_events (user_id, symptom, severity, notes, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            event.symptom.as_str(),
            event.severity,
            event.notes,
            format_timestamp(&event.occurred_at),
        ],
    )?;
    Ok(SymptomEvent {
        id: conn.last_insert_rowid(),
        user_id,
        symptom: event.symptom,
        severity: event.severity,
        notes: event.notes.clone(),
        occurred_at: event.occurred_at,
    })
}

pub fn get_symptom_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
) -> Result<Option<SymptomEvent>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, symptom, severity, notes, occurred_at
             FROM symptom_events WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            read_row,
        )
        .optional()?;
    row.map(symptom_from_row).transpose()
}

/// Symptom events in `[from, to]`, ascending by `occurred_at`.
pub fn get_symptom_events(
    conn: &Connection,
    user_id: i64,
    symptom: Option<SymptomKind>,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> Result<Vec<SymptomEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, symptom, severity, notes, occurred_at
         FROM symptom_events
         WHERE user_id = ?1
           AND (?2 IS NULL OR symptom = ?2)
           AND occurred_at BETWEEN ?3 AND ?4
         ORDER BY occurred_at ASC, id ASC",
    )?;

    let rows = stmt.query_map(
        params![
            user_id,
            symptom.map(|s| s.as_str()),
            format_timestamp(from),
            format_timestamp(to),
        ],
        read_row,
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(symptom_from_row(row?)?);
    }
    Ok(events)
}

/// Distinct symptom types the user logged in `[from, to]`.
pub fn get_symptom_kinds(
    conn: &Connection,
    user_id: i64,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> Result<Vec<SymptomKind>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT symptom FROM symptom_events
         WHERE user_id = ?1 AND occurred_at BETWEEN ?2 AND ?3
         ORDER BY symptom",
    )?;
    let rows = stmt.query_map(
        params![user_id, format_timestamp(from), format_timestamp(to)],
        |row| row.get::<_, String>(0),
    )?;

    let mut kinds = Vec::new();
    for row in rows {
        kinds.push(SymptomKind::from_str(&row?)?);
    }
    kinds.sort();
    Ok(kinds)
}

/// Rewrite a logged symptom. Alerts built on the old or new symptom type are
/// marked stale and queued for the next recompute.
pub fn update_symptom_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
    event: &NewSymptomEvent,
    now: &NaiveDateTime,
) -> Result<SymptomEvent, DatabaseError> {
    check_severity(event.severity)?;
    let previous = get_symptom_event(conn, user_id, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "SymptomEvent".into(),
        id: id.to_string(),
    })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE symptom_events SET symptom = ?1, severity = ?2, notes = ?3, occurred_at = ?4
         WHERE id = ?5 AND user_id = ?6",
        params![
            event.symptom.as_str(),
            event.severity,
            event.notes,
            format_timestamp(&event.occurred_at),
            id,
            user_id,
        ],
    )?;
    invalidate_symptom(&tx, user_id, previous.symptom, now)?;
    if previous.symptom != event.symptom {
        invalidate_symptom(&tx, user_id, event.symptom, now)?;
    }
    tx.commit()?;

    Ok(SymptomEvent {
        id,
        user_id,
        symptom: event.symptom,
        severity: event.severity,
        notes: event.notes.clone(),
        occurred_at: event.occurred_at,
    })
}

/// Delete a logged symptom and queue its symptom type for recompute.
pub fn delete_symptom_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
    now: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let previous = get_symptom_event(conn, user_id, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "SymptomEvent".into(),
        id: id.to_string(),
    })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM symptom_events WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    invalidate_symptom(&tx, user_id, previous.symptom, now)?;
    tx.commit()?;
    Ok(())
}

type SymptomRow = (i64, i64, String, i64, Option<String>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymptomRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn symptom_from_row(row: SymptomRow) -> Result<SymptomEvent, DatabaseError> {
    let (id, user_id, symptom, severity, notes, occurred_at) = row;
    let severity = u8::try_from(severity)
        .ok()
        .filter(|s| *s <= MAX_SYMPTOM_SEVERITY)
        .ok_or_else(|| {
            DatabaseError::ConstraintViolation(format!("stored severity {severity} out of range"))
        })?;
    Ok(SymptomEvent {
        id,
        user_id,
        symptom: SymptomKind::from_str(&symptom)?,
        severity,
        notes,
        occurred_at: parse_timestamp(&occurred_at)?,
    })
}
