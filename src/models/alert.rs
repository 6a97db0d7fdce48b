use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::{AlertType, SymptomKind};

/// Highest value on the alert importance scale (lowest is 1).
pub const MAX_ALERT_SEVERITY: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub alert_type: AlertType,
    /// 1-5 importance, unrelated to the 0-10 symptom scale.
    pub severity: u8,
    pub summary: String,
    pub details: AlertDetails,
    pub generated_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
    /// Set when a different window later won for the same symptom/subject.
    pub superseded_by: Option<i64>,
    /// Underlying events were edited since this alert was generated.
    pub stale: bool,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub matches: u32,
    pub trials: u32,
}

/// Structured evidence stored as JSON in `alerts.details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    pub symptom: SymptomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_symptom: Option<SymptomKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_hours: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,
    pub evidence: Evidence,
    /// Rounded to 2 decimals.
    pub confidence: f64,
    pub baseline: f64,
    /// Mean severity distance from baseline over matched trials.
    pub effect: f64,
    pub direction: Direction,
}

/// Identifies one alert slot across recompute runs.
///
/// `subject` is the treatment name, `symptom:<kind>` for symptom pairs,
/// or empty for spikes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub user_id: i64,
    pub alert_type: AlertType,
    pub symptom: SymptomKind,
    pub subject: String,
    pub window_class: String,
}

/// Prefix marking a symptom (rather than a treatment) in `DedupKey::subject`.
pub const SYMPTOM_SUBJECT_PREFIX: &str = "symptom:";

impl DedupKey {
    pub fn symptom_subject(kind: SymptomKind) -> String {
        format!("{SYMPTOM_SUBJECT_PREFIX}{}", kind.as_str())
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.user_id, self.alert_type, self.symptom, self.subject, self.window_class
        )
    }
}

/// Alert content produced by the synthesizer, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub key: DedupKey,
    pub severity: u8,
    pub summary: String,
    pub details: AlertDetails,
    pub generated_at: NaiveDateTime,
}

/// Whether an upsert filled a new alert slot or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}
