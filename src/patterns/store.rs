//! SQLite-backed `EventStore`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::{self, Invalidation};
use crate::models::enums::SymptomKind;
use crate::models::*;

use super::error::StoreError;
use super::traits::EventStore;

/// One connection behind a mutex. Every write is a single statement or an
/// IMMEDIATE transaction, so serialising callers here is sufficient.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (creating and migrating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(db::open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(db::open_memory_database()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }

    // ── Operations outside the engine seam ──────────────────

    pub fn insert_user(&self, email: &str, name: &str) -> Result<i64, StoreError> {
        Ok(db::insert_user(&*self.conn()?, email, name)?)
    }

    pub fn record_symptom(
        &self,
        user_id: i64,
        event: &NewSymptomEvent,
    ) -> Result<SymptomEvent, StoreError> {
        Ok(db::insert_symptom_event(&*self.conn()?, user_id, event)?)
    }

    pub fn record_treatment(
        &self,
        user_id: i64,
        event: &NewTreatmentEvent,
    ) -> Result<TreatmentEvent, StoreError> {
        Ok(db::insert_treatment_event(&*self.conn()?, user_id, event)?)
    }

    pub fn update_symptom(
        &self,
        user_id: i64,
        id: i64,
        event: &NewSymptomEvent,
        now: &NaiveDateTime,
    ) -> Result<SymptomEvent, StoreError> {
        Ok(db::update_symptom_event(&*self.conn()?, user_id, id, event, now)?)
    }

    pub fn update_treatment(
        &self,
        user_id: i64,
        id: i64,
        event: &NewTreatmentEvent,
        now: &NaiveDateTime,
    ) -> Result<TreatmentEvent, StoreError> {
        Ok(db::update_treatment_event(&*self.conn()?, user_id, id, event, now)?)
    }

    pub fn delete_symptom(
        &self,
        user_id: i64,
        id: i64,
        now: &NaiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(db::delete_symptom_event(&*self.conn()?, user_id, id, now)?)
    }

    pub fn delete_treatment(
        &self,
        user_id: i64,
        id: i64,
        now: &NaiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(db::delete_treatment_event(&*self.conn()?, user_id, id, now)?)
    }

    pub fn list_alerts(&self, user_id: i64, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        Ok(db::list_alerts(&*self.conn()?, user_id, filter)?)
    }

    pub fn get_alert(&self, user_id: i64, alert_id: i64) -> Result<Option<Alert>, StoreError> {
        Ok(db::get_alert(&*self.conn()?, user_id, alert_id)?)
    }

    pub fn resolve_alert(
        &self,
        user_id: i64,
        alert_id: i64,
        at: &NaiveDateTime,
    ) -> Result<Alert, StoreError> {
        let alert = db::resolve_alert(&*self.conn()?, user_id, alert_id, at)?;
        tracing::info!(user_id, alert_id, "Alert resolved");
        Ok(alert)
    }
}

impl EventStore for SqliteEventStore {
    fn symptom_kinds(
        &self,
        user_id: i64,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<SymptomKind>, StoreError> {
        Ok(db::get_symptom_kinds(&*self.conn()?, user_id, from, to)?)
    }

    fn treatment_names(
        &self,
        user_id: i64,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<String>, StoreError> {
        Ok(db::get_treatment_names(&*self.conn()?, user_id, from, to)?)
    }

    fn fetch_symptom_events(
        &self,
        user_id: i64,
        symptom: Option<SymptomKind>,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<SymptomEvent>, StoreError> {
        Ok(db::get_symptom_events(&*self.conn()?, user_id, symptom, from, to)?)
    }

    fn fetch_treatment_events(
        &self,
        user_id: i64,
        treatment: Option<&str>,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<TreatmentEvent>, StoreError> {
        Ok(db::get_treatment_events(&*self.conn()?, user_id, treatment, from, to)?)
    }

    fn upsert_alert(&self, data: &AlertData) -> Result<(Alert, UpsertOutcome), StoreError> {
        Ok(db::upsert_alert(&*self.conn()?, data)?)
    }

    fn pending_invalidations(&self, user_id: i64) -> Result<Vec<Invalidation>, StoreError> {
        Ok(db::get_invalidations(&*self.conn()?, user_id)?)
    }

    fn clear_invalidations(&self, user_id: i64, up_to_id: i64) -> Result<usize, StoreError> {
        Ok(db::clear_invalidations(&*self.conn()?, user_id, up_to_id)?)
    }
}
