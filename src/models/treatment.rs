use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::TreatmentType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEvent {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub treatment_type: TreatmentType,
    pub dose: Option<String>,
    pub notes: Option<String>,
    pub administered_at: NaiveDateTime,
}

/// Input for logging a new treatment administration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTreatmentEvent {
    pub name: String,
    pub treatment_type: TreatmentType,
    pub dose: Option<String>,
    pub notes: Option<String>,
    pub administered_at: NaiveDateTime,
}
