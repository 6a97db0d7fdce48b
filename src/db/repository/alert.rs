use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::enums::*;
use crate::models::*;

const ALERT_COLUMNS: &str = "id, user_id, type, severity, summary, details,
    generated_at, resolved_at, superseded_by, stale";

/// Create-or-update the unresolved alert occupying `data.key`.
///
/// Runs in an IMMEDIATE transaction so two writers cannot both miss the
/// existing row. A concurrent insert that slipped through surfaces as a
/// UNIQUE violation (`DatabaseError::is_write_conflict`).
pub fn upsert_alert(
    conn: &Connection,
    data: &AlertData,
) -> Result<(Alert, UpsertOutcome), DatabaseError> {
    if !(1..=MAX_ALERT_SEVERITY).contains(&data.severity) {
        return Err(DatabaseError::ConstraintViolation(format!(
            "alert severity {} outside 1-{MAX_ALERT_SEVERITY}",
            data.severity
        )));
    }
    let details_json = serde_json::to_string(&data.details)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let key = &data.key;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM alerts
             WHERE user_id = ?1 AND type = ?2 AND dedup_symptom = ?3
               AND dedup_subject = ?4 AND window_class = ?5 AND resolved_at IS NULL",
            params![
                key.user_id,
                key.alert_type.as_str(),
                key.symptom.as_str(),
                key.subject,
                key.window_class,
            ],
            |row| row.get(0),
        )
        .optional()?;

    let (alert_id, outcome) = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE alerts
                 SET severity = ?1, summary = ?2, details = ?3, generated_at = ?4,
                     superseded_by = NULL, stale = 0
                 WHERE id = ?5",
                params![
                    data.severity,
                    data.summary,
                    details_json,
                    format_timestamp(&data.generated_at),
                    id,
                ],
            )?;
            (id, UpsertOutcome::Updated)
        }
        None => {
            tx.execute(
                "INSERT INTO alerts
                 (user_id, type, severity, summary, details, dedup_symptom, dedup_subject,
                  window_class, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key.user_id,
                    key.alert_type.as_str(),
                    data.severity,
                    data.summary,
                    details_json,
                    key.symptom.as_str(),
                    key.subject,
                    key.window_class,
                    format_timestamp(&data.generated_at),
                ],
            )?;
            (tx.last_insert_rowid(), UpsertOutcome::Created)
        }
    };

    // Older windows for the same symptom/subject step aside for the winner.
    let superseded = tx.execute(
        "UPDATE alerts SET superseded_by = ?1
         WHERE user_id = ?2 AND type = ?3 AND dedup_symptom = ?4 AND dedup_subject = ?5
           AND window_class != ?6 AND resolved_at IS NULL",
        params![
            alert_id,
            key.user_id,
            key.alert_type.as_str(),
            key.symptom.as_str(),
            key.subject,
            key.window_class,
        ],
    )?;
    if superseded > 0 {
        tracing::debug!(alert_id, superseded, key = %key, "Superseded alerts for other windows");
    }

    tx.commit()?;

    let alert = get_alert(conn, key.user_id, alert_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Alert".into(),
        id: alert_id.to_string(),
    })?;
    Ok((alert, outcome))
}

pub fn get_alert(
    conn: &Connection,
    user_id: i64,
    alert_id: i64,
) -> Result<Option<Alert>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1 AND user_id = ?2"),
            params![alert_id, user_id],
            read_row,
        )
        .optional()?;
    row.map(alert_from_row).transpose()
}

/// Alerts for one user, most important first:
/// severity desc, then generated_at desc, then id asc.
pub fn list_alerts(
    conn: &Connection,
    user_id: i64,
    filter: &AlertFilter,
) -> Result<Vec<Alert>, DatabaseError> {
    let resolution_clause = match filter.resolution {
        ResolutionFilter::Unresolved => "AND resolved_at IS NULL AND superseded_by IS NULL",
        ResolutionFilter::Resolved => "AND resolved_at IS NOT NULL",
        ResolutionFilter::All => "",
    };
    let sql = format!(
        "SELECT {ALERT_COLUMNS} FROM alerts
         WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2) {resolution_clause}
         ORDER BY severity DESC, generated_at DESC, id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id, filter.alert_type.map(|t| t.as_str())],
        read_row,
    )?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(alert_from_row(row?)?);
    }
    Ok(alerts)
}

/// Mark an alert resolved. `resolved_at` is written once; resolving an
/// already-resolved alert returns it unchanged.
pub fn resolve_alert(
    conn: &Connection,
    user_id: i64,
    alert_id: i64,
    at: &NaiveDateTime,
) -> Result<Alert, DatabaseError> {
    conn.execute(
        "UPDATE alerts SET resolved_at = ?1
         WHERE id = ?2 AND user_id = ?3 AND resolved_at IS NULL",
        params![format_timestamp(at), alert_id, user_id],
    )?;
    get_alert(conn, user_id, alert_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Alert".into(),
        id: alert_id.to_string(),
    })
}

type AlertRow = (
    i64, i64, String, i64, String, String,
    String, Option<String>, Option<i64>, i32,
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn alert_from_row(row: AlertRow) -> Result<Alert, DatabaseError> {
    let (
        id, user_id, alert_type, severity, summary, details_json,
        generated_at, resolved_at, superseded_by, stale,
    ) = row;

    let details: AlertDetails = serde_json::from_str(&details_json)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let severity = u8::try_from(severity)
        .ok()
        .filter(|s| (1..=MAX_ALERT_SEVERITY).contains(s))
        .ok_or_else(|| {
            DatabaseError::ConstraintViolation(format!("stored alert severity {severity}"))
        })?;

    Ok(Alert {
        id,
        user_id,
        alert_type: AlertType::from_str(&alert_type)?,
        severity,
        summary,
        details,
        generated_at: parse_timestamp(&generated_at)?,
        resolved_at: resolved_at.as_deref().map(parse_timestamp).transpose()?,
        superseded_by,
        stale: stale != 0,
    })
}
