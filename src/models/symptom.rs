use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::SymptomKind;

/// Highest value on the symptom severity scale.
pub const MAX_SYMPTOM_SEVERITY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomEvent {
    pub id: i64,
    pub user_id: i64,
    pub symptom: SymptomKind,
    /// 0-10 scale.
    pub severity: u8,
    pub notes: Option<String>,
    pub occurred_at: NaiveDateTime,
}

/// Input for logging a new symptom event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSymptomEvent {
    pub symptom: SymptomKind,
    pub severity: u8,
    pub notes: Option<String>,
    pub occurred_at: NaiveDateTime,
}
