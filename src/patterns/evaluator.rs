//! Statistical evaluation of aligned trials.
//!
//! A trial matches when its windowed severity sits at least the configured
//! delta away from baseline in the direction under test. Confidence is
//! matches over decided trials; a window is alert-worthy once it has
//! `min_trials` decided trials and `min_confidence`.

use std::cmp::Ordering;

use chrono::{Days, NaiveDate, NaiveDateTime};

use crate::models::enums::SymptomKind;
use crate::models::{Direction, SymptomEvent, TreatmentEvent};

use super::types::*;
use super::windowing::{self, AlignedTrials, WindowTrials};

/// matches / trials, clamped to [0, 1]. Zero trials yield zero confidence.
pub fn confidence(matches: u32, trials: u32) -> f64 {
    if trials == 0 {
        return 0.0;
    }
    (f64::from(matches) / f64::from(trials)).clamp(0.0, 1.0)
}

/// Score of one candidate window in one direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowScore {
    pub window: OffsetWindow,
    pub matches: u32,
    pub trials: u32,
    pub confidence: f64,
    /// Mean distance from baseline over matched trials.
    pub effect: f64,
}

pub fn score_window(
    trials: &WindowTrials,
    baseline: f64,
    threshold: &MatchThreshold,
    direction: Direction,
) -> WindowScore {
    let mut matches = 0u32;
    let mut distance = 0.0;
    for obs in &trials.observations {
        let observed = f64::from(obs.windowed_severity);
        if threshold.is_match(observed, baseline, direction) {
            matches += 1;
            distance += (observed - baseline).abs();
        }
    }
    let effect = if matches == 0 { 0.0 } else { distance / f64::from(matches) };

    WindowScore {
        window: trials.window,
        matches,
        trials: trials.trials(),
        confidence: confidence(matches, trials.trials()),
        effect,
    }
}

pub fn passes_gate(score: &WindowScore, config: &AnalysisConfig) -> bool {
    score.trials >= config.min_trials && score.confidence >= config.min_confidence
}

/// Ordering where `Greater` means "preferred": higher confidence, then the
/// narrower window, then the earlier one.
fn preference(a: &WindowScore, b: &WindowScore) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| b.window.width().cmp(&a.window.width()))
        .then_with(|| b.window.lo.cmp(&a.window.lo))
}

/// Pick the winning window among those passing the gate.
/// Candidates tied on every criterion resolve to the first listed.
pub fn select_best<I>(scores: I, config: &AnalysisConfig) -> Option<WindowScore>
where
    I: IntoIterator<Item = WindowScore>,
{
    scores
        .into_iter()
        .filter(|s| passes_gate(s, config))
        .fold(None, |best: Option<WindowScore>, s| match best {
            Some(b) if preference(&s, &b) != Ordering::Greater => Some(b),
            _ => Some(s),
        })
}

fn best_in_direction(
    aligned: &AlignedTrials,
    baseline: f64,
    direction: Direction,
    config: &AnalysisConfig,
) -> Option<WindowScore> {
    select_best(
        aligned
            .windows
            .iter()
            .map(|w| score_window(w, baseline, &config.threshold, direction)),
        config,
    )
}

fn windowed_finding(
    symptom: SymptomKind,
    subject: FindingSubject,
    direction: Direction,
    baseline: f64,
    score: WindowScore,
) -> Finding {
    Finding {
        symptom,
        subject,
        direction,
        span: FindingSpan::Window(score.window),
        matches: score.matches,
        trials: score.trials,
        confidence: score.confidence,
        baseline,
        effect: score.effect,
    }
}

/// Evaluate one (symptom, treatment) pair in both directions: a rise after
/// the treatment (post-treatment) and a fall (improvement).
///
/// `symptoms` must be ordered by `occurred_at`.
pub fn evaluate_treatment_pair(
    symptom: SymptomKind,
    treatment: &str,
    administrations: &[TreatmentEvent],
    symptoms: &[SymptomEvent],
    config: &AnalysisConfig,
) -> PairOutcome {
    let target = PairTarget::Treatment {
        symptom,
        treatment: treatment.to_string(),
    };
    if (administrations.len() as u64) < u64::from(config.min_trials) {
        return PairOutcome::Skipped {
            target,
            reason: SkipReason::InsufficientData,
        };
    }

    let anchors: Vec<NaiveDateTime> = administrations.iter().map(|t| t.administered_at).collect();
    let aligned = windowing::align(&anchors, symptoms, &config.windows);
    let Some(baseline) = aligned.baseline else {
        return PairOutcome::Skipped {
            target,
            reason: SkipReason::NoBaseline,
        };
    };

    let findings = [Direction::Increase, Direction::Decrease]
        .into_iter()
        .filter_map(|direction| {
            best_in_direction(&aligned, baseline, direction, config).map(|score| {
                windowed_finding(
                    symptom,
                    FindingSubject::Treatment(treatment.to_string()),
                    direction,
                    baseline,
                    score,
                )
            })
        })
        .collect();

    PairOutcome::Evaluated { target, findings }
}

enum LeadResult {
    Insufficient,
    NoBaseline,
    Scored(Option<Finding>),
}

fn evaluate_lead(
    lead: SymptomKind,
    lead_events: &[SymptomEvent],
    follow: SymptomKind,
    follow_events: &[SymptomEvent],
    config: &AnalysisConfig,
) -> LeadResult {
    let anchors = windowing::elevated_anchors(lead_events, &config.threshold);
    if (anchors.len() as u64) < u64::from(config.min_trials) {
        return LeadResult::Insufficient;
    }
    let aligned = windowing::align(&anchors, follow_events, &config.windows);
    let Some(baseline) = aligned.baseline else {
        return LeadResult::NoBaseline;
    };
    LeadResult::Scored(
        best_in_direction(&aligned, baseline, Direction::Increase, config).map(|score| {
            windowed_finding(
                follow,
                FindingSubject::Symptom(lead),
                Direction::Increase,
                baseline,
                score,
            )
        }),
    )
}

/// Evaluate whether either symptom tends to follow elevated episodes of the
/// other. Both leading orders are tried; the better finding wins, with the
/// `first`-leading order preferred on a full tie.
pub fn evaluate_symptom_pair(
    first: SymptomKind,
    first_events: &[SymptomEvent],
    second: SymptomKind,
    second_events: &[SymptomEvent],
    config: &AnalysisConfig,
) -> PairOutcome {
    let target = PairTarget::SymptomPair { first, second };

    let forward = evaluate_lead(first, first_events, second, second_events, config);
    let reverse = evaluate_lead(second, second_events, first, first_events, config);

    let (forward, reverse) = match (forward, reverse) {
        (LeadResult::Insufficient, LeadResult::Insufficient) => {
            return PairOutcome::Skipped {
                target,
                reason: SkipReason::InsufficientData,
            };
        }
        (
            LeadResult::Insufficient | LeadResult::NoBaseline,
            LeadResult::Insufficient | LeadResult::NoBaseline,
        ) => {
            return PairOutcome::Skipped {
                target,
                reason: SkipReason::NoBaseline,
            };
        }
        (f, r) => (scored(f), scored(r)),
    };

    let best = match (forward, reverse) {
        (Some(f), Some(r)) => {
            if finding_preference(&r, &f) == Ordering::Greater {
                Some(r)
            } else {
                Some(f)
            }
        }
        (f, r) => f.or(r),
    };

    PairOutcome::Evaluated {
        target,
        findings: best.into_iter().collect(),
    }
}

fn scored(result: LeadResult) -> Option<Finding> {
    match result {
        LeadResult::Scored(finding) => finding,
        LeadResult::Insufficient | LeadResult::NoBaseline => None,
    }
}

fn finding_preference(a: &Finding, b: &Finding) -> Ordering {
    let width = |f: &Finding| match f.span {
        FindingSpan::Window(w) => (w.width(), w.lo),
        FindingSpan::Trailing { days } => (days * 24, 0),
    };
    let (wa, la) = width(a);
    let (wb, lb) = width(b);
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| wb.cmp(&wa))
        .then_with(|| lb.cmp(&la))
}

/// Spike mode: does `symptom` run above its usual level on enough of the
/// trailing `spike_period_days`?
///
/// The usual level is the mean daily max over the part of `period` before
/// the trailing days. A spike day is a trailing day whose max beats that
/// level by the threshold.
pub fn evaluate_spike(
    symptom: SymptomKind,
    events: &[SymptomEvent],
    period: &AnalysisPeriod,
    config: &AnalysisConfig,
) -> PairOutcome {
    let target = PairTarget::Spike { symptom };
    let last_day = period.to.date();
    let first_trailing = last_day
        .checked_sub_days(Days::new(u64::from(config.spike_period_days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MIN);

    let days = windowing::daily_max(events);
    let (before, trailing): (Vec<_>, Vec<_>) = days
        .iter()
        .filter(|(day, _)| **day <= last_day)
        .partition(|(day, _)| **day < first_trailing);

    if (trailing.len() as u64) < u64::from(config.spike_min_days) {
        return PairOutcome::Skipped {
            target,
            reason: SkipReason::InsufficientData,
        };
    }
    let usual: Vec<u8> = before.iter().map(|(_, max)| **max).collect();
    let Some(baseline) = windowing::mean(&usual) else {
        return PairOutcome::Skipped {
            target,
            reason: SkipReason::NoBaseline,
        };
    };

    let mut spike_days = 0u32;
    let mut distance = 0.0;
    for (_, max) in &trailing {
        let observed = f64::from(**max);
        if config.threshold.is_match(observed, baseline, Direction::Increase) {
            spike_days += 1;
            distance += observed - baseline;
        }
    }

    let observed_days = trailing.len() as u32;
    let findings = if spike_days >= config.spike_min_days {
        vec![Finding {
            symptom,
            subject: FindingSubject::None,
            direction: Direction::Increase,
            span: FindingSpan::Trailing {
                days: config.spike_period_days,
            },
            matches: spike_days,
            trials: observed_days,
            confidence: confidence(spike_days, observed_days),
            baseline,
            effect: distance / f64::from(spike_days),
        }]
    } else {
        Vec::new()
    };

    PairOutcome::Evaluated { target, findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::TreatmentType;
    use chrono::TimeDelta;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + TimeDelta::days(i64::from(d))
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn symptom(kind: SymptomKind, at: NaiveDateTime, severity: u8) -> SymptomEvent {
        SymptomEvent {
            id: 0,
            user_id: 1,
            symptom: kind,
            severity,
            notes: None,
            occurred_at: at,
        }
    }

    fn dose(name: &str, at: NaiveDateTime) -> TreatmentEvent {
        TreatmentEvent {
            id: 0,
            user_id: 1,
            name: name.into(),
            treatment_type: TreatmentType::Medication,
            dose: None,
            notes: None,
            administered_at: at,
        }
    }

    fn sorted(mut events: Vec<SymptomEvent>) -> Vec<SymptomEvent> {
        events.sort_by_key(|e| e.occurred_at);
        events
    }

    fn config_with(windows: &[(u32, u32)]) -> AnalysisConfig {
        AnalysisConfig {
            windows: windows.iter().map(|&(lo, hi)| OffsetWindow::new(lo, hi)).collect(),
            ..Default::default()
        }
    }

    fn findings(outcome: PairOutcome) -> Vec<Finding> {
        match outcome {
            PairOutcome::Evaluated { findings, .. } => findings,
            PairOutcome::Skipped { reason, .. } => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        for trials in 0..=20 {
            for matches in 0..=trials + 2 {
                let c = confidence(matches, trials);
                assert!((0.0..=1.0).contains(&c), "{matches}/{trials} -> {c}");
            }
        }
    }

    #[test]
    fn confidence_is_monotonic() {
        for trials in 1..=15 {
            for matches in 0..trials {
                assert!(confidence(matches + 1, trials) >= confidence(matches, trials));
                assert!(confidence(matches, trials + 1) <= confidence(matches, trials));
            }
        }
    }

    #[test]
    fn ibuprofen_headache_scenario() {
        // Ten doses three days apart. Headache peaks 3h later on 8 of them.
        let mut doses = Vec::new();
        let mut events = Vec::new();
        for i in 0..10 {
            let d = i * 3;
            doses.push(dose("Ibuprofen", at(d, 8)));
            events.push(symptom(SymptomKind::Headache, at(d, 11), if i < 8 { 7 } else { 3 }));
            events.push(symptom(SymptomKind::Headache, at(d + 1, 20), 3));
        }
        let config = config_with(&[(2, 4)]);

        let found = findings(evaluate_treatment_pair(
            SymptomKind::Headache,
            "Ibuprofen",
            &doses,
            &sorted(events),
            &config,
        ));

        assert_eq!(found.len(), 1);
        let f = &found[0];
        assert_eq!(f.alert_type(), crate::models::enums::AlertType::PostTreatment);
        assert_eq!(f.span, FindingSpan::Window(OffsetWindow::new(2, 4)));
        assert_eq!((f.matches, f.trials), (8, 10));
        assert!((f.confidence - 0.8).abs() < 1e-9);
        assert!((f.baseline - 3.0).abs() < 1e-9);
        assert!((f.effect - 4.0).abs() < 1e-9);
    }

    #[test]
    fn equal_confidence_prefers_earlier_of_equal_width() {
        // Four doses four days apart; 3 of 4 match in both (0,6) and (6,12).
        let mut doses = Vec::new();
        let mut events = Vec::new();
        for i in 0..4 {
            let d = i * 4;
            doses.push(dose("Iron", at(d, 0)));
            let sev = if i < 3 { 8 } else { 2 };
            events.push(symptom(SymptomKind::Nausea, at(d, 3), sev));
            events.push(symptom(SymptomKind::Nausea, at(d, 9), sev));
            events.push(symptom(SymptomKind::Nausea, at(d + 2, 0), 2));
        }
        let config = config_with(&[(6, 12), (0, 6)]);

        let found = findings(evaluate_treatment_pair(
            SymptomKind::Nausea,
            "Iron",
            &doses,
            &sorted(events),
            &config,
        ));

        assert_eq!(found.len(), 1);
        assert!((found[0].confidence - 0.75).abs() < 1e-9);
        assert_eq!(found[0].span, FindingSpan::Window(OffsetWindow::new(0, 6)));
    }

    #[test]
    fn select_best_prefers_confidence_then_narrow() {
        let config = AnalysisConfig::default();
        let score = |lo, hi, matches, trials| WindowScore {
            window: OffsetWindow::new(lo, hi),
            matches,
            trials,
            confidence: confidence(matches, trials),
            effect: 2.0,
        };

        let best = select_best([score(0, 6, 3, 4), score(6, 12, 4, 4)], &config).unwrap();
        assert_eq!(best.window, OffsetWindow::new(6, 12));

        let best = select_best([score(0, 12, 3, 4), score(12, 18, 3, 4)], &config).unwrap();
        assert_eq!(best.window, OffsetWindow::new(12, 18));

        // Below min_trials or min_confidence: nothing qualifies.
        assert!(select_best([score(0, 6, 2, 2), score(6, 12, 1, 4)], &config).is_none());
    }

    #[test]
    fn two_administrations_are_skipped() {
        let doses = vec![dose("Melatonin", at(0, 22)), dose("Melatonin", at(1, 22))];
        let events = vec![
            symptom(SymptomKind::SleepQuality, at(0, 23), 9),
            symptom(SymptomKind::SleepQuality, at(1, 23), 9),
            symptom(SymptomKind::SleepQuality, at(5, 12), 2),
        ];

        let outcome = evaluate_treatment_pair(
            SymptomKind::SleepQuality,
            "Melatonin",
            &doses,
            &events,
            &AnalysisConfig::default(),
        );
        assert!(matches!(
            outcome,
            PairOutcome::Skipped { reason: SkipReason::InsufficientData, .. }
        ));
    }

    #[test]
    fn no_events_outside_windows_is_no_baseline() {
        let doses: Vec<_> = (0..3).map(|d| dose("Yoga", at(d, 7))).collect();
        let events: Vec<_> = (0..3)
            .map(|d| symptom(SymptomKind::Pain, at(d, 9), 4))
            .collect();

        let outcome = evaluate_treatment_pair(
            SymptomKind::Pain,
            "Yoga",
            &doses,
            &events,
            &AnalysisConfig::default(),
        );
        assert!(matches!(
            outcome,
            PairOutcome::Skipped { reason: SkipReason::NoBaseline, .. }
        ));
    }

    #[test]
    fn improvement_after_treatment_is_co_occurrence() {
        let mut doses = Vec::new();
        let mut events = Vec::new();
        for i in 0..5 {
            let d = i * 5;
            doses.push(dose("Stretching", at(d, 8)));
            events.push(symptom(SymptomKind::Pain, at(d, 10), 2));
            events.push(symptom(SymptomKind::Pain, at(d + 3, 12), 7));
        }

        let found = findings(evaluate_treatment_pair(
            SymptomKind::Pain,
            "Stretching",
            &doses,
            &sorted(events),
            &config_with(&[(0, 6)]),
        ));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::Decrease);
        assert_eq!(found[0].alert_type(), crate::models::enums::AlertType::CoOccurrence);
        assert!((found[0].effect - 5.0).abs() < 1e-9);
    }

    fn spike_fixture(spike_days: u32) -> (Vec<SymptomEvent>, AnalysisPeriod) {
        // Days 0-20 at severity 2, then a trailing week (days 21-27).
        let mut events: Vec<_> = (0..21)
            .map(|d| symptom(SymptomKind::Pain, at(d, 12), 2))
            .collect();
        for d in 21..28 {
            let sev = if d - 21 < spike_days { 6 } else { 2 };
            events.push(symptom(SymptomKind::Pain, at(d, 12), sev));
        }
        (events, AnalysisPeriod::trailing(at(27, 23), 60))
    }

    #[test]
    fn spike_on_three_of_seven_days_alerts() {
        let (events, period) = spike_fixture(3);
        let found = findings(evaluate_spike(
            SymptomKind::Pain,
            &events,
            &period,
            &AnalysisConfig::default(),
        ));

        assert_eq!(found.len(), 1);
        let f = &found[0];
        assert_eq!(f.alert_type(), crate::models::enums::AlertType::Spike);
        assert_eq!((f.matches, f.trials), (3, 7));
        assert_eq!(f.span, FindingSpan::Trailing { days: 7 });
        assert!((f.baseline - 2.0).abs() < 1e-9);
    }

    #[test]
    fn spike_on_two_of_seven_days_does_not() {
        let (events, period) = spike_fixture(2);
        let found = findings(evaluate_spike(
            SymptomKind::Pain,
            &events,
            &period,
            &AnalysisConfig::default(),
        ));
        assert!(found.is_empty());
    }

    #[test]
    fn spike_period_reaching_before_min_date_is_clamped() {
        let config = AnalysisConfig {
            spike_period_days: MAX_PERIOD_DAYS,
            ..Default::default()
        };
        let end = NaiveDateTime::MIN + TimeDelta::days(2);
        let events = vec![symptom(SymptomKind::Pain, end, 9)];
        let outcome = evaluate_spike(
            SymptomKind::Pain,
            &events,
            &AnalysisPeriod::trailing(end, 60),
            &config,
        );
        assert!(matches!(
            outcome,
            PairOutcome::Skipped { reason: SkipReason::InsufficientData, .. }
        ));
    }

    #[test]
    fn spike_without_history_has_no_baseline() {
        let events: Vec<_> = (0..7)
            .map(|d| symptom(SymptomKind::Fatigue, at(d, 9), 8))
            .collect();
        let outcome = evaluate_spike(
            SymptomKind::Fatigue,
            &events,
            &AnalysisPeriod::trailing(at(6, 23), 60),
            &AnalysisConfig::default(),
        );
        assert!(matches!(
            outcome,
            PairOutcome::Skipped { reason: SkipReason::NoBaseline, .. }
        ));
    }

    #[test]
    fn headache_follows_nausea() {
        let mut nausea = Vec::new();
        let mut headache = Vec::new();
        for i in 0..4 {
            let d = i * 3;
            nausea.push(symptom(SymptomKind::Nausea, at(d, 8), 8));
            nausea.push(symptom(SymptomKind::Nausea, at(d + 1, 8), 2));
            headache.push(symptom(SymptomKind::Headache, at(d, 10), 7));
            headache.push(symptom(SymptomKind::Headache, at(13 + i, 10), 2));
        }

        let found = findings(evaluate_symptom_pair(
            SymptomKind::Nausea,
            &sorted(nausea),
            SymptomKind::Headache,
            &sorted(headache),
            &AnalysisConfig::default(),
        ));

        assert_eq!(found.len(), 1);
        let f = &found[0];
        assert_eq!(f.symptom, SymptomKind::Headache);
        assert_eq!(f.subject, FindingSubject::Symptom(SymptomKind::Nausea));
        assert_eq!(f.span, FindingSpan::Window(OffsetWindow::new(0, 6)));
        assert_eq!((f.matches, f.trials), (4, 4));
    }

    #[test]
    fn flat_symptoms_have_no_elevated_episodes() {
        let flat: Vec<_> = (0..5).map(|d| symptom(SymptomKind::Mood, at(d, 9), 4)).collect();
        let other: Vec<_> = (0..5).map(|d| symptom(SymptomKind::Energy, at(d, 9), 4)).collect();

        let outcome = evaluate_symptom_pair(
            SymptomKind::Mood,
            &flat,
            SymptomKind::Energy,
            &other,
            &AnalysisConfig::default(),
        );
        assert!(matches!(
            outcome,
            PairOutcome::Skipped { reason: SkipReason::InsufficientData, .. }
        ));
    }
}
