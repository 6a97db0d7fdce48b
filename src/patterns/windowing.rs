use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{Direction, SymptomEvent};

use super::types::{MatchThreshold, OffsetWindow};

/// One anchor's observation within one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialObservation {
    pub anchor: NaiveDateTime,
    /// Max symptom severity inside the window.
    pub windowed_severity: u8,
}

/// All decided trials for a single candidate window.
/// Anchors with no symptom event in the window are absent, not zero.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTrials {
    pub window: OffsetWindow,
    pub observations: Vec<TrialObservation>,
}

impl WindowTrials {
    pub fn trials(&self) -> u32 {
        self.observations.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTrials {
    /// Number of anchors (administrations or elevated episodes) considered.
    pub anchors: usize,
    /// Mean severity of events outside every window of every anchor.
    pub baseline: Option<f64>,
    pub baseline_samples: usize,
    pub windows: Vec<WindowTrials>,
}

/// Align symptom events to anchors across candidate windows.
///
/// `symptoms` must be ordered by `occurred_at`. Anchors may be in any order
/// and may overlap; each forms an independent trial, so one symptom event
/// can count toward several trials.
pub fn align(
    anchors: &[NaiveDateTime],
    symptoms: &[SymptomEvent],
    windows: &[OffsetWindow],
) -> AlignedTrials {
    debug_assert!(symptoms.windows(2).all(|p| p[0].occurred_at <= p[1].occurred_at));

    let per_window = windows
        .iter()
        .map(|&window| WindowTrials {
            window,
            observations: anchors
                .iter()
                .filter_map(|&anchor| {
                    max_severity_between(
                        symptoms,
                        window.start_after(anchor),
                        window.end_after(anchor),
                    )
                    .map(|windowed_severity| TrialObservation {
                        anchor,
                        windowed_severity,
                    })
                })
                .collect(),
        })
        .collect();

    let covered = covered_intervals(anchors, windows);
    let outside: Vec<u8> = symptoms
        .iter()
        .filter(|e| !is_covered(&covered, e.occurred_at))
        .map(|e| e.severity)
        .collect();

    AlignedTrials {
        anchors: anchors.len(),
        baseline: mean(&outside),
        baseline_samples: outside.len(),
        windows: per_window,
    }
}

/// Max severity of events with `occurred_at` in `[start, end]`.
fn max_severity_between(
    symptoms: &[SymptomEvent],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<u8> {
    let lo = symptoms.partition_point(|e| e.occurred_at < start);
    let hi = symptoms.partition_point(|e| e.occurred_at <= end);
    symptoms.get(lo..hi)?.iter().map(|e| e.severity).max()
}

/// Union of every `[anchor + lo, anchor + hi]`, merged and sorted.
fn covered_intervals(
    anchors: &[NaiveDateTime],
    windows: &[OffsetWindow],
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut spans: Vec<_> = anchors
        .iter()
        .flat_map(|&a| windows.iter().map(move |w| (w.start_after(a), w.end_after(a))))
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn is_covered(merged: &[(NaiveDateTime, NaiveDateTime)], at: NaiveDateTime) -> bool {
    let idx = merged.partition_point(|&(start, _)| start <= at);
    idx > 0 && at <= merged[idx - 1].1
}

pub fn mean(values: &[u8]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: u32 = values.iter().map(|&v| u32::from(v)).sum();
    Some(f64::from(sum) / values.len() as f64)
}

/// Times of events whose severity beats the symptom's own mean by the
/// threshold. These act as anchors when one symptom leads another.
pub fn elevated_anchors(events: &[SymptomEvent], threshold: &MatchThreshold) -> Vec<NaiveDateTime> {
    let severities: Vec<u8> = events.iter().map(|e| e.severity).collect();
    let Some(level) = mean(&severities) else {
        return Vec::new();
    };
    events
        .iter()
        .filter(|e| threshold.is_match(f64::from(e.severity), level, Direction::Increase))
        .map(|e| e.occurred_at)
        .collect()
}

/// Highest severity per calendar day.
pub fn daily_max(events: &[SymptomEvent]) -> BTreeMap<NaiveDate, u8> {
    let mut days = BTreeMap::new();
    for e in events {
        days.entry(e.occurred_at.date())
            .and_modify(|max: &mut u8| *max = (*max).max(e.severity))
            .or_insert(e.severity);
    }
    days
}
