use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::models::enums::{AlertType, SymptomKind};
use crate::models::{Alert, Direction};

use super::error::PatternError;

// ═══════════════════════════════════════════
// Windows & thresholds
// ═══════════════════════════════════════════

/// Hour offsets after an administration: `[anchor + lo, anchor + hi]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetWindow {
    pub lo: u32,
    pub hi: u32,
}

impl OffsetWindow {
    pub const fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    pub fn width(&self) -> u32 {
        self.hi.saturating_sub(self.lo)
    }

    /// Saturates at `NaiveDateTime::MAX` for anchors near the end of time.
    pub fn start_after(&self, anchor: NaiveDateTime) -> NaiveDateTime {
        offset_hours(anchor, self.lo)
    }

    pub fn end_after(&self, anchor: NaiveDateTime) -> NaiveDateTime {
        offset_hours(anchor, self.hi)
    }

    /// Dedup-key label, e.g. `"0-6h"`.
    pub fn class(&self) -> String {
        format!("{}-{}h", self.lo, self.hi)
    }
}

fn offset_hours(anchor: NaiveDateTime, hours: u32) -> NaiveDateTime {
    anchor
        .checked_add_signed(TimeDelta::hours(i64::from(hours)))
        .unwrap_or(NaiveDateTime::MAX)
}

/// How far a windowed severity must sit from baseline to count as a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MatchThreshold {
    /// Fixed number of severity points.
    Absolute { delta: f64 },
    /// Fraction of baseline, never less than `MIN_RELATIVE_DELTA` points.
    Relative { fraction: f64 },
}

/// Floor for relative thresholds so a near-zero baseline does not match everything.
pub const MIN_RELATIVE_DELTA: f64 = 1.0;

impl MatchThreshold {
    pub fn delta_for(&self, baseline: f64) -> f64 {
        match *self {
            Self::Absolute { delta } => delta,
            Self::Relative { fraction } => (baseline * fraction).max(MIN_RELATIVE_DELTA),
        }
    }

    pub fn is_match(&self, observed: f64, baseline: f64, direction: Direction) -> bool {
        let distance = match direction {
            Direction::Increase => observed - baseline,
            Direction::Decrease => baseline - observed,
        };
        distance >= self.delta_for(baseline)
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self::Absolute { delta: 1.5 }
    }
}

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

/// Upper bound for every day count in the config, and for window offsets.
pub const MAX_PERIOD_DAYS: u32 = 3650;
const MAX_WINDOW_HOURS: u32 = MAX_PERIOD_DAYS * 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Candidate windows, in evaluation order. May overlap.
    pub windows: Vec<OffsetWindow>,
    /// Minimum administrations, and minimum decided trials per window.
    pub min_trials: u32,
    /// Minimum matches/trials for a window to become alert-worthy.
    pub min_confidence: f64,
    pub threshold: MatchThreshold,
    /// Trailing days inspected by spike mode.
    pub spike_period_days: u32,
    /// Spike days needed within the trailing period.
    pub spike_min_days: u32,
    /// Default analysis period when the caller gives none.
    pub analysis_period_days: u32,
    /// Concurrent pair evaluations. `None` uses available parallelism.
    pub max_workers: Option<usize>,
    /// Overall recompute deadline.
    pub run_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                OffsetWindow::new(0, 6),
                OffsetWindow::new(6, 12),
                OffsetWindow::new(12, 24),
                OffsetWindow::new(24, 48),
                OffsetWindow::new(48, 72),
            ],
            min_trials: 3,
            min_confidence: 0.6,
            threshold: MatchThreshold::default(),
            spike_period_days: 7,
            spike_min_days: 3,
            analysis_period_days: 60,
            max_workers: None,
            run_timeout_secs: 30,
        }
    }
}

impl AnalysisConfig {
    /// Reject configurations that cannot produce meaningful results.
    pub fn validate(&self) -> Result<(), PatternError> {
        let fail = |msg: String| Err(PatternError::Configuration(msg));

        if self.windows.is_empty() {
            return fail("at least one window is required".into());
        }
        for (i, w) in self.windows.iter().enumerate() {
            if w.lo >= w.hi {
                return fail(format!("window {}-{}h: lower bound must be below upper", w.lo, w.hi));
            }
            if w.hi > MAX_WINDOW_HOURS {
                return fail(format!(
                    "window {}-{}h ends beyond {MAX_WINDOW_HOURS}h",
                    w.lo, w.hi
                ));
            }
            if self.windows[..i].contains(w) {
                return fail(format!("window {}-{}h listed twice", w.lo, w.hi));
            }
        }
        if self.min_trials == 0 {
            return fail("min_trials must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) || self.min_confidence.is_nan() {
            return fail(format!("min_confidence {} outside [0, 1]", self.min_confidence));
        }
        match self.threshold {
            MatchThreshold::Absolute { delta } if !(delta > 0.0 && delta <= 10.0) => {
                return fail(format!("absolute delta {delta} outside (0, 10]"));
            }
            MatchThreshold::Relative { fraction } if !(fraction > 0.0 && fraction.is_finite()) => {
                return fail(format!("relative fraction {fraction} must be positive"));
            }
            _ => {}
        }
        if self.spike_period_days == 0 || self.spike_min_days == 0 {
            return fail("spike period and spike day count must be positive".into());
        }
        if self.spike_min_days > self.spike_period_days {
            return fail(format!(
                "spike_min_days {} exceeds spike_period_days {}",
                self.spike_min_days, self.spike_period_days
            ));
        }
        if self.spike_period_days > MAX_PERIOD_DAYS {
            return fail(format!(
                "spike_period_days {} exceeds {MAX_PERIOD_DAYS}",
                self.spike_period_days
            ));
        }
        if self.analysis_period_days == 0 {
            return fail("analysis_period_days must be positive".into());
        }
        if self.analysis_period_days > MAX_PERIOD_DAYS {
            return fail(format!(
                "analysis_period_days {} exceeds {MAX_PERIOD_DAYS}",
                self.analysis_period_days
            ));
        }
        if self.max_workers == Some(0) {
            return fail("max_workers must be positive".into());
        }
        if self.run_timeout_secs == 0 {
            return fail("run_timeout_secs must be positive".into());
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

// ═══════════════════════════════════════════
// Analysis period
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPeriod {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl AnalysisPeriod {
    pub fn new(from: NaiveDateTime, to: NaiveDateTime) -> Result<Self, PatternError> {
        if from > to {
            return Err(PatternError::Configuration(format!(
                "analysis period starts ({from}) after it ends ({to})"
            )));
        }
        Ok(Self { from, to })
    }

    /// The `days` days ending at `end`, clamped to `NaiveDateTime::MIN`.
    pub fn trailing(end: NaiveDateTime, days: u32) -> Self {
        Self {
            from: end
                .checked_sub_signed(TimeDelta::days(i64::from(days)))
                .unwrap_or(NaiveDateTime::MIN),
            to: end,
        }
    }
}

// ═══════════════════════════════════════════
// Evaluation targets & outcomes
// ═══════════════════════════════════════════

/// One independent unit of work in a recompute run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PairTarget {
    /// Symptom response after a treatment, both directions.
    Treatment { symptom: SymptomKind, treatment: String },
    /// Trailing-period spike of one symptom.
    Spike { symptom: SymptomKind },
    /// Two symptoms, `first < second`; both leading orders are tried.
    SymptomPair { first: SymptomKind, second: SymptomKind },
}

impl std::fmt::Display for PairTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Treatment { symptom, treatment } => write!(f, "{symptom}×{treatment}"),
            Self::Spike { symptom } => write!(f, "spike:{symptom}"),
            Self::SymptomPair { first, second } => write!(f, "{first}×{second}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Fewer administrations (or observed days) than `min_trials` / `spike_min_days`.
    InsufficientData,
    /// Every symptom event fell inside a window, so there is no normal level.
    NoBaseline,
    /// The events for this pair could not be fetched.
    FetchFailed,
    /// The evaluation task panicked or was torn down.
    EvaluationFailed,
}

/// What the moving symptom was compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingSubject {
    Treatment(String),
    Symptom(SymptomKind),
    None,
}

/// Where a finding was observed: an offset window after each anchor, or a
/// trailing run of days (spike mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingSpan {
    Window(OffsetWindow),
    Trailing { days: u32 },
}

impl FindingSpan {
    /// Dedup-key window class: `"2-4h"` or `"trailing-7d"`.
    pub fn class(&self) -> String {
        match self {
            Self::Window(w) => w.class(),
            Self::Trailing { days } => format!("trailing-{days}d"),
        }
    }
}

/// A statistically significant pattern, before it becomes an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    /// The symptom whose severity moved.
    pub symptom: SymptomKind,
    pub subject: FindingSubject,
    pub direction: Direction,
    pub span: FindingSpan,
    pub matches: u32,
    pub trials: u32,
    pub confidence: f64,
    pub baseline: f64,
    pub effect: f64,
}

impl Finding {
    pub fn alert_type(&self) -> AlertType {
        match (&self.subject, self.direction) {
            (FindingSubject::None, _) => AlertType::Spike,
            (FindingSubject::Treatment(_), Direction::Increase) => AlertType::PostTreatment,
            _ => AlertType::CoOccurrence,
        }
    }
}

/// Result of evaluating one `PairTarget`.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Evaluated { target: PairTarget, findings: Vec<Finding> },
    Skipped { target: PairTarget, reason: SkipReason },
}

// ═══════════════════════════════════════════
// Run summary
// ═══════════════════════════════════════════

/// Returned by a recompute. "No data" is a zeroed summary, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecomputeSummary {
    pub run_id: String,
    pub alerts_created: u32,
    pub alerts_updated: u32,
    /// Alerts dropped after a failed upsert (including a failed retry).
    pub alerts_failed: u32,
    pub pairs_evaluated: u32,
    pub pairs_skipped: u32,
    /// The run hit its deadline or was cancelled; counts cover committed work only.
    pub cancelled: bool,
    /// Alerts touched by this run, most important first.
    pub alerts: Vec<Alert>,
}
