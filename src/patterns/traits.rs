//! The event-store seam between the pattern engine and persistence.
//!
//! The engine only reads events, upserts alerts, and consumes the
//! invalidation list. Everything else (event logging, alert listing,
//! resolution) is reached through the concrete store.

use chrono::NaiveDateTime;

use crate::db::Invalidation;
use crate::models::enums::SymptomKind;
use crate::models::*;

use super::error::StoreError;

pub trait EventStore: Send + Sync {
    /// Distinct symptom kinds logged by the user in `[from, to]`.
    fn symptom_kinds(
        &self,
        user_id: i64,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<SymptomKind>, StoreError>;

    /// Distinct treatment names administered in `[from, to]`.
    fn treatment_names(
        &self,
        user_id: i64,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<String>, StoreError>;

    /// Ascending by `occurred_at`. `None` fetches every kind.
    fn fetch_symptom_events(
        &self,
        user_id: i64,
        symptom: Option<SymptomKind>,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<SymptomEvent>, StoreError>;

    /// Ascending by `administered_at`. `None` fetches every treatment.
    fn fetch_treatment_events(
        &self,
        user_id: i64,
        treatment: Option<&str>,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<TreatmentEvent>, StoreError>;

    /// Atomic create-or-update on `data.key`.
    fn upsert_alert(&self, data: &AlertData) -> Result<(Alert, UpsertOutcome), StoreError>;

    /// Dirty entries recorded by event edits, oldest first.
    fn pending_invalidations(&self, user_id: i64) -> Result<Vec<Invalidation>, StoreError>;

    /// Drop dirty entries with id <= `up_to_id`. Returns how many were removed.
    fn clear_invalidations(&self, user_id: i64, up_to_id: i64) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn event_store_is_object_safe() {
        fn accepts(_: Option<Arc<dyn EventStore>>) {}
        accepts(None);
    }
}
