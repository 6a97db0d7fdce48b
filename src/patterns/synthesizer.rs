use chrono::NaiveDateTime;

use crate::models::*;

use super::types::{Finding, FindingSpan, FindingSubject};

/// Effect (severity points from baseline) that saturates the effect score.
const EFFECT_SCALE: f64 = 5.0;
const CONFIDENCE_WEIGHT: f64 = 0.6;
const EFFECT_WEIGHT: f64 = 0.4;
/// Upper bounds of composite-score buckets 1-4; anything above is 5.
const SEVERITY_CUTOFFS: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Normalized 0-1 effect size.
pub fn effect_score(effect: f64) -> f64 {
    (effect.abs() / EFFECT_SCALE).clamp(0.0, 1.0)
}

/// 1-5 alert importance. Monotonic in both confidence and effect.
pub fn alert_severity(confidence: f64, effect: f64) -> u8 {
    let composite =
        CONFIDENCE_WEIGHT * confidence.clamp(0.0, 1.0) + EFFECT_WEIGHT * effect_score(effect);
    let bucket = SEVERITY_CUTOFFS
        .iter()
        .take_while(|&&cutoff| composite >= cutoff)
        .count();
    bucket as u8 + 1
}

/// Symptom pairs are keyed on the unordered pair, so either leading order
/// lands in the same slot.
pub fn dedup_key(user_id: i64, finding: &Finding) -> DedupKey {
    let (symptom, subject) = match &finding.subject {
        FindingSubject::Treatment(name) => (finding.symptom, name.clone()),
        FindingSubject::Symptom(lead) => {
            let (low, high) = if *lead < finding.symptom {
                (*lead, finding.symptom)
            } else {
                (finding.symptom, *lead)
            };
            (low, DedupKey::symptom_subject(high))
        }
        FindingSubject::None => (finding.symptom, String::new()),
    };
    DedupKey {
        user_id,
        alert_type: finding.alert_type(),
        symptom,
        subject,
        window_class: finding.span.class(),
    }
}

pub fn summary(finding: &Finding) -> String {
    let name = finding.symptom.display_name();
    match (&finding.subject, finding.span) {
        (FindingSubject::Treatment(treatment), FindingSpan::Window(w)) => {
            let verb = match finding.direction {
                Direction::Increase => "increase",
                Direction::Decrease => "improve",
            };
            format!("{name} tends to {verb} {}-{}h after {treatment}", w.lo, w.hi)
        }
        (FindingSubject::Symptom(lead), FindingSpan::Window(w)) => format!(
            "{name} tends to follow {} within {}-{}h",
            lead.display_name().to_lowercase(),
            w.lo,
            w.hi
        ),
        (_, FindingSpan::Trailing { days }) => format!(
            "{name} spiked on {} of the last {days} days",
            finding.matches
        ),
        (FindingSubject::None, FindingSpan::Window(w)) => {
            format!("{name} runs high {}-{}h after episodes", w.lo, w.hi)
        }
    }
}

pub fn details(finding: &Finding) -> AlertDetails {
    let (treatment, related_symptom) = match &finding.subject {
        FindingSubject::Treatment(name) => (Some(name.clone()), None),
        FindingSubject::Symptom(lead) => (None, Some(*lead)),
        FindingSubject::None => (None, None),
    };
    let (window_hours, period_days) = match finding.span {
        FindingSpan::Window(w) => (Some([w.lo, w.hi]), None),
        FindingSpan::Trailing { days } => (None, Some(days)),
    };
    AlertDetails {
        symptom: finding.symptom,
        treatment,
        related_symptom,
        window_hours,
        period_days,
        evidence: Evidence {
            matches: finding.matches,
            trials: finding.trials,
        },
        confidence: round2(finding.confidence),
        baseline: round2(finding.baseline),
        effect: round2(finding.effect),
        direction: finding.direction,
    }
}

/// Turn an alert-worthy finding into upsert-ready alert content.
pub fn synthesize(user_id: i64, finding: &Finding, generated_at: NaiveDateTime) -> AlertData {
    AlertData {
        key: dedup_key(user_id, finding),
        severity: alert_severity(finding.confidence, finding.effect),
        summary: summary(finding),
        details: details(finding),
        generated_at,
    }
}

/// Output order: severity desc, then generated_at desc, then id asc.
pub fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.generated_at.cmp(&a.generated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{AlertType, SymptomKind};
    use crate::patterns::types::OffsetWindow;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn treatment_finding(direction: Direction) -> Finding {
        Finding {
            symptom: SymptomKind::Headache,
            subject: FindingSubject::Treatment("Ibuprofen".into()),
            direction,
            span: FindingSpan::Window(OffsetWindow::new(2, 4)),
            matches: 8,
            trials: 10,
            confidence: 0.8,
            baseline: 3.0,
            effect: 3.5,
        }
    }

    #[test]
    fn severity_buckets() {
        assert_eq!(alert_severity(0.0, 0.0), 1);
        assert_eq!(alert_severity(0.5, 0.0), 2);
        assert_eq!(alert_severity(0.6, 1.5), 3);
        assert_eq!(alert_severity(0.8, 3.0), 4);
        assert_eq!(alert_severity(1.0, 5.0), 5);
        assert_eq!(alert_severity(1.0, 50.0), 5);
    }

    #[test]
    fn severity_is_monotonic() {
        for c in 0..=20 {
            for e in 0..=20 {
                let conf = f64::from(c) / 20.0;
                let effect = f64::from(e) / 2.0;
                let s = alert_severity(conf, effect);
                assert!((1..=MAX_ALERT_SEVERITY).contains(&s));
                assert!(alert_severity(conf + 0.05, effect) >= s);
                assert!(alert_severity(conf, effect + 0.5) >= s);
            }
        }
    }

    #[test]
    fn post_treatment_alert() {
        let data = synthesize(7, &treatment_finding(Direction::Increase), now());

        assert_eq!(data.summary, "Headache tends to increase 2-4h after Ibuprofen");
        assert_eq!(data.key.alert_type, AlertType::PostTreatment);
        assert_eq!(data.key.subject, "Ibuprofen");
        assert_eq!(data.key.window_class, "2-4h");
        assert_eq!(data.details.window_hours, Some([2, 4]));
        assert_eq!(data.details.evidence, Evidence { matches: 8, trials: 10 });
        assert_eq!(data.details.confidence, 0.8);
        assert_eq!(data.severity, 4);
    }

    #[test]
    fn improvement_summary() {
        let data = synthesize(7, &treatment_finding(Direction::Decrease), now());
        assert_eq!(data.summary, "Headache tends to improve 2-4h after Ibuprofen");
        assert_eq!(data.key.alert_type, AlertType::CoOccurrence);
    }

    #[test]
    fn symptom_pair_key_is_order_independent() {
        let mut finding = treatment_finding(Direction::Increase);
        finding.subject = FindingSubject::Symptom(SymptomKind::Nausea);
        let forward = dedup_key(1, &finding);

        finding.symptom = SymptomKind::Nausea;
        finding.subject = FindingSubject::Symptom(SymptomKind::Headache);
        let reverse = dedup_key(1, &finding);

        assert_eq!(forward, reverse);
        assert_eq!(forward.symptom, SymptomKind::Nausea);
        assert_eq!(forward.subject, "symptom:headache");
    }

    #[test]
    fn symptom_pair_summary() {
        let mut finding = treatment_finding(Direction::Increase);
        finding.subject = FindingSubject::Symptom(SymptomKind::SleepQuality);
        assert_eq!(
            summary(&finding),
            "Headache tends to follow sleep quality within 2-4h"
        );
    }

    #[test]
    fn spike_alert() {
        let finding = Finding {
            symptom: SymptomKind::Pain,
            subject: FindingSubject::None,
            direction: Direction::Increase,
            span: FindingSpan::Trailing { days: 7 },
            matches: 3,
            trials: 7,
            confidence: 3.0 / 7.0,
            baseline: 2.0,
            effect: 4.0,
        };
        let data = synthesize(1, &finding, now());

        assert_eq!(data.summary, "Pain spiked on 3 of the last 7 days");
        assert_eq!(data.key.window_class, "trailing-7d");
        assert_eq!(data.key.subject, "");
        assert_eq!(data.details.confidence, 0.43);
        assert_eq!(data.details.period_days, Some(7));
        assert!(data.details.window_hours.is_none());
    }

    #[test]
    fn sort_orders_by_severity_then_recency_then_id() {
        let base = synthesize(1, &treatment_finding(Direction::Increase), now());
        let alert = |id, severity, hour| Alert {
            id,
            user_id: 1,
            alert_type: AlertType::PostTreatment,
            severity,
            summary: base.summary.clone(),
            details: base.details.clone(),
            generated_at: now().date().and_hms_opt(hour, 0, 0).unwrap(),
            resolved_at: None,
            superseded_by: None,
            stale: false,
        };
        let mut alerts = vec![alert(4, 3, 9), alert(2, 5, 8), alert(3, 3, 10), alert(1, 3, 10)];

        sort_alerts(&mut alerts);

        let ids: Vec<i64> = alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);
    }
}
