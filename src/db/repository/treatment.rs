use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::enums::TreatmentType;
use crate::models::*;

use super::invalidation::invalidate_treatment;

fn check_name(name: &str) -> Result<&str, DatabaseError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::ConstraintViolation(
            "treatment name must not be empty".into(),
        ));
    }
    // Symptom-pair alerts own this prefix in the dedup subject.
    if trimmed.starts_with(SYMPTOM_SUBJECT_PREFIX) {
        return Err(DatabaseError::ConstraintViolation(format!(
            "treatment name must not start with '{SYMPTOM_SUBJECT_PREFIX}'"
        )));
    }
    Ok(trimmed)
}

pub fn insert_treatment_event(
    conn: &Connection,
    user_id: i64,
    event: &NewTreatmentEvent,
) -> Result<TreatmentEvent, DatabaseError> {
    let name = check_name(&event.name)?;
    conn.execute(
        "INSERT INTO treatment_events (user_id, name, type, dose, notes, administered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            name,
            event.treatment_type.as_str(),
            event.dose,
            event.notes,
            format_timestamp(&event.administered_at),
        ],
    )?;
    Ok(TreatmentEvent {
        id: conn.last_insert_rowid(),
        user_id,
        name: name.to_string(),
        treatment_type: event.treatment_type,
        dose: event.dose.clone(),
        notes: event.notes.clone(),
        administered_at: event.administered_at,
    })
}

pub fn get_treatment_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
) -> Result<Option<TreatmentEvent>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, name, type, dose, notes, administered_at
             FROM treatment_events WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            read_row,
        )
        .optional()?;
    row.map(treatment_from_row).transpose()
}

/// Treatment administrations in `[from, to]`, ascending by `administered_at`.
pub fn get_treatment_events(
    conn: &Connection,
    user_id: i64,
    name: Option<&str>,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> Result<Vec<TreatmentEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, type, dose, notes, administered_at
         FROM treatment_events
         WHERE user_id = ?1
           AND (?2 IS NULL OR name = ?2)
           AND administered_at BETWEEN ?3 AND ?4
         ORDER BY administered_at ASC, id ASC",
    )?;

    let rows = stmt.query_map(
        params![user_id, name, format_timestamp(from), format_timestamp(to)],
        read_row,
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(treatment_from_row(row?)?);
    }
    Ok(events)
}

/// Distinct treatment names the user logged in `[from, to]`.
pub fn get_treatment_names(
    conn: &Connection,
    user_id: i64,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT name FROM treatment_events
         WHERE user_id = ?1 AND administered_at BETWEEN ?2 AND ?3
         ORDER BY name",
    )?;
    let rows = stmt.query_map(
        params![user_id, format_timestamp(from), format_timestamp(to)],
        |row| row.get::<_, String>(0),
    )?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DatabaseError::from)
}

/// Rewrite a logged treatment. Alerts built on the old or new treatment name
/// are marked stale and queued for the next recompute.
pub fn update_treatment_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
    event: &NewTreatmentEvent,
    now: &NaiveDateTime,
) -> Result<TreatmentEvent, DatabaseError> {
    let name = check_name(&event.name)?;
    let previous =
        get_treatment_event(conn, user_id, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity_type: "TreatmentEvent".into(),
            id: id.to_string(),
        })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE treatment_events
         SET name = ?1, type = ?2, dose = ?3, notes = ?4, administered_at = ?5
         WHERE id = ?6 AND user_id = ?7",
        params![
            name,
            event.treatment_type.as_str(),
            event.dose,
            event.notes,
            format_timestamp(&event.administered_at),
            id,
            user_id,
        ],
    )?;
    invalidate_treatment(&tx, user_id, &previous.name, now)?;
    if previous.name != name {
        invalidate_treatment(&tx, user_id, name, now)?;
    }
    tx.commit()?;

    Ok(TreatmentEvent {
        id,
        user_id,
        name: name.to_string(),
        treatment_type: event.treatment_type,
        dose: event.dose.clone(),
        notes: event.notes.clone(),
        administered_at: event.administered_at,
    })
}

/// Delete a logged treatment and queue its name for recompute.
pub fn delete_treatment_event(
    conn: &Connection,
    user_id: i64,
    id: i64,
    now: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let previous =
        get_treatment_event(conn, user_id, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity_type: "TreatmentEvent".into(),
            id: id.to_string(),
        })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM treatment_events WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    invalidate_treatment(&tx, user_id, &previous.name, now)?;
    tx.commit()?;
    Ok(())
}

type TreatmentRow = (i64, i64, String, String, Option<String>, Option<String>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TreatmentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn treatment_from_row(row: TreatmentRow) -> Result<TreatmentEvent, DatabaseError> {
    let (id, user_id, name, treatment_type, dose, notes, administered_at) = row;
    Ok(TreatmentEvent {
        id,
        user_id,
        name,
        treatment_type: TreatmentType::from_str(&treatment_type)?,
        dose,
        notes,
        administered_at: parse_timestamp(&administered_at)?,
    })
}
