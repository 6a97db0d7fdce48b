//! RecomputeOrchestrator: runs the full pattern pipeline for one user.
//!
//! Discovery → batched fetch (once per symptom kind and treatment name) →
//! concurrent pair evaluation → serial alert upsert.
//!
//! Pair evaluations share read-only snapshots and run on the blocking pool,
//! bounded by a semaphore. Upserts are driven serially by the collecting
//! task, also on the blocking pool, one IMMEDIATE transaction each. A
//! cancelled run still leaves every committed alert whole.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDateTime, SubsecRound, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::enums::SymptomKind;
use crate::models::*;

use super::error::{PatternError, StoreError};
use super::evaluator;
use super::synthesizer;
use super::traits::EventStore;
use super::types::*;

/// Cooperative cancellation shared between a caller and a running recompute.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called (immediately if it already was).
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

type SymptomSnapshot = Arc<Vec<SymptomEvent>>;
type TreatmentSnapshot = Arc<Vec<TreatmentEvent>>;

/// One pair evaluation with the snapshots it needs.
enum PairJob {
    Treatment {
        symptom: SymptomKind,
        treatment: String,
        administrations: TreatmentSnapshot,
        events: SymptomSnapshot,
    },
    Spike {
        symptom: SymptomKind,
        events: SymptomSnapshot,
        period: AnalysisPeriod,
    },
    SymptomPair {
        first: SymptomKind,
        first_events: SymptomSnapshot,
        second: SymptomKind,
        second_events: SymptomSnapshot,
    },
}

impl PairJob {
    fn target(&self) -> PairTarget {
        match self {
            Self::Treatment { symptom, treatment, .. } => PairTarget::Treatment {
                symptom: *symptom,
                treatment: treatment.clone(),
            },
            Self::Spike { symptom, .. } => PairTarget::Spike { symptom: *symptom },
            Self::SymptomPair { first, second, .. } => PairTarget::SymptomPair {
                first: *first,
                second: *second,
            },
        }
    }

    fn evaluate(&self, config: &AnalysisConfig) -> PairOutcome {
        match self {
            Self::Treatment {
                symptom,
                treatment,
                administrations,
                events,
            } => evaluator::evaluate_treatment_pair(
                *symptom,
                treatment,
                administrations,
                events,
                config,
            ),
            Self::Spike {
                symptom,
                events,
                period,
            } => evaluator::evaluate_spike(*symptom, events, period, config),
            Self::SymptomPair {
                first,
                first_events,
                second,
                second_events,
            } => evaluator::evaluate_symptom_pair(
                *first,
                first_events,
                *second,
                second_events,
                config,
            ),
        }
    }
}

/// Per-run tallies, turned into a `RecomputeSummary` at the end.
#[derive(Default)]
struct RunTally {
    created: u32,
    updated: u32,
    failed: u32,
    evaluated: u32,
    skipped: u32,
    alerts: Vec<Alert>,
}

pub struct RecomputeOrchestrator {
    store: Arc<dyn EventStore>,
    config: Arc<AnalysisConfig>,
    clock: fn() -> NaiveDateTime,
}

impl RecomputeOrchestrator {
    /// Rejects an invalid configuration before any run can start.
    pub fn new(store: Arc<dyn EventStore>, config: AnalysisConfig) -> Result<Self, PatternError> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            clock: utc_now,
        })
    }

    /// Replace the wall clock (UTC, whole seconds by default).
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Recompute all alerts for `user_id` over `period`
    /// (default: trailing `analysis_period_days`), bounded by the run timeout.
    pub async fn recompute_alerts(
        &self,
        user_id: i64,
        period: Option<AnalysisPeriod>,
    ) -> Result<RecomputeSummary, PatternError> {
        self.recompute_alerts_with_cancel(user_id, period, &CancelHandle::new())
            .await
    }

    /// Like `recompute_alerts`, but also stops early when `cancel` fires.
    /// Alerts upserted before the stop stay committed.
    pub async fn recompute_alerts_with_cancel(
        &self,
        user_id: i64,
        period: Option<AnalysisPeriod>,
        cancel: &CancelHandle,
    ) -> Result<RecomputeSummary, PatternError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("recompute", run_id = %run_id, user_id);
        self.run(user_id, period, cancel, run_id).instrument(span).await
    }

    async fn run(
        &self,
        user_id: i64,
        period: Option<AnalysisPeriod>,
        cancel: &CancelHandle,
        run_id: String,
    ) -> Result<RecomputeSummary, PatternError> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.run_timeout();
        let now = (self.clock)();
        let period =
            period.unwrap_or_else(|| AnalysisPeriod::trailing(now, self.config.analysis_period_days));
        if period.from > period.to {
            return Err(PatternError::Configuration(format!(
                "analysis period starts ({}) after it ends ({})",
                period.from, period.to
            )));
        }

        tracing::info!(from = %period.from, to = %period.to, "Recompute started");

        // Dirty entries present now are covered by this run.
        let watermark = self
            .store
            .pending_invalidations(user_id)
            .map_err(fetch_failure)?
            .last()
            .map(|entry| entry.id);

        let mut kinds = self
            .store
            .symptom_kinds(user_id, &period.from, &period.to)
            .map_err(fetch_failure)?;
        kinds.sort_unstable();
        kinds.dedup();
        let mut names = self
            .store
            .treatment_names(user_id, &period.from, &period.to)
            .map_err(fetch_failure)?;
        names.sort();
        names.dedup();

        let (jobs, mut tally) = self.build_jobs(user_id, &period, &kinds, &names);
        let total_jobs = jobs.len();

        let semaphore = Arc::new(Semaphore::new(self.config.worker_count()));
        let mut running = JoinSet::new();
        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let config = Arc::clone(&self.config);
            running.spawn(async move {
                let target = job.target();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return PairOutcome::Skipped {
                        target,
                        reason: SkipReason::EvaluationFailed,
                    };
                };
                match tokio::task::spawn_blocking(move || job.evaluate(&config)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(pair = %target, error = %e, "Pair evaluation failed");
                        PairOutcome::Skipped {
                            target,
                            reason: SkipReason::EvaluationFailed,
                        }
                    }
                }
            });
        }
        tracing::debug!(jobs = total_jobs, workers = self.config.worker_count(), "Pair jobs spawned");

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Recompute cancelled, keeping committed alerts");
                    cancelled = true;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        timeout_secs = self.config.run_timeout_secs,
                        "Recompute timed out, keeping committed alerts"
                    );
                    cancelled = true;
                    break;
                }
                next = running.join_next() => match next {
                    None => break,
                    Some(Ok(outcome)) => {
                        self.apply_outcome(user_id, outcome, now, &mut tally).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Pair task aborted");
                        tally.skipped += 1;
                    }
                },
            }
        }
        if cancelled {
            running.abort_all();
        }

        if let (false, Some(up_to)) = (cancelled, watermark) {
            match self.store.clear_invalidations(user_id, up_to) {
                Ok(cleared) => tracing::debug!(cleared, "Invalidations consumed"),
                Err(e) => tracing::warn!(error = %e, "Failed to clear invalidations"),
            }
        }

        synthesizer::sort_alerts(&mut tally.alerts);
        let summary = RecomputeSummary {
            run_id,
            alerts_created: tally.created,
            alerts_updated: tally.updated,
            alerts_failed: tally.failed,
            pairs_evaluated: tally.evaluated,
            pairs_skipped: tally.skipped,
            cancelled,
            alerts: tally.alerts,
        };

        tracing::info!(
            created = summary.alerts_created,
            updated = summary.alerts_updated,
            failed = summary.alerts_failed,
            evaluated = summary.pairs_evaluated,
            skipped = summary.pairs_skipped,
            cancelled,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recompute finished"
        );
        Ok(summary)
    }

    /// Fetch each symptom kind and treatment name once, then pair them up.
    /// Pairs whose events could not be fetched are counted as skipped here.
    fn build_jobs(
        &self,
        user_id: i64,
        period: &AnalysisPeriod,
        kinds: &[SymptomKind],
        names: &[String],
    ) -> (Vec<PairJob>, RunTally) {
        let mut tally = RunTally::default();

        let mut symptoms: BTreeMap<SymptomKind, SymptomSnapshot> = BTreeMap::new();
        for &kind in kinds {
            match self
                .store
                .fetch_symptom_events(user_id, Some(kind), &period.from, &period.to)
            {
                Ok(events) => {
                    symptoms.insert(kind, Arc::new(events));
                }
                Err(e) => tracing::warn!(symptom = %kind, error = %e, "Symptom fetch failed"),
            }
        }
        let mut treatments: BTreeMap<&str, TreatmentSnapshot> = BTreeMap::new();
        for name in names {
            match self
                .store
                .fetch_treatment_events(user_id, Some(name), &period.from, &period.to)
            {
                Ok(events) => {
                    treatments.insert(name.as_str(), Arc::new(events));
                }
                Err(e) => tracing::warn!(treatment = %name, error = %e, "Treatment fetch failed"),
            }
        }

        let mut jobs = Vec::new();

        for (i, &kind) in kinds.iter().enumerate() {
            let Some(events) = symptoms.get(&kind) else {
                for name in names {
                    fetch_failed(
                        PairTarget::Treatment { symptom: kind, treatment: name.clone() },
                        &mut tally,
                    );
                }
                fetch_failed(PairTarget::Spike { symptom: kind }, &mut tally);
                for &other in &kinds[i + 1..] {
                    fetch_failed(
                        PairTarget::SymptomPair { first: kind, second: other },
                        &mut tally,
                    );
                }
                continue;
            };

            for name in names {
                match treatments.get(name.as_str()) {
                    Some(administrations) => jobs.push(PairJob::Treatment {
                        symptom: kind,
                        treatment: name.clone(),
                        administrations: Arc::clone(administrations),
                        events: Arc::clone(events),
                    }),
                    None => fetch_failed(
                        PairTarget::Treatment { symptom: kind, treatment: name.clone() },
                        &mut tally,
                    ),
                }
            }

            jobs.push(PairJob::Spike {
                symptom: kind,
                events: Arc::clone(events),
                period: *period,
            });

            for &other in &kinds[i + 1..] {
                match symptoms.get(&other) {
                    Some(other_events) => jobs.push(PairJob::SymptomPair {
                        first: kind,
                        first_events: Arc::clone(events),
                        second: other,
                        second_events: Arc::clone(other_events),
                    }),
                    None => fetch_failed(
                        PairTarget::SymptomPair { first: kind, second: other },
                        &mut tally,
                    ),
                }
            }
        }

        (jobs, tally)
    }

    /// Tally one pair outcome and upsert its findings. Upserts run one at a
    /// time on the blocking pool; the collector waits for each commit.
    async fn apply_outcome(
        &self,
        user_id: i64,
        outcome: PairOutcome,
        now: NaiveDateTime,
        tally: &mut RunTally,
    ) {
        let findings = match outcome {
            PairOutcome::Skipped { target, reason } => {
                tracing::debug!(pair = %target, ?reason, "Pair skipped");
                tally.skipped += 1;
                return;
            }
            PairOutcome::Evaluated { findings, .. } => findings,
        };
        tally.evaluated += 1;

        for finding in &findings {
            let data = synthesizer::synthesize(user_id, finding, now);
            let store = Arc::clone(&self.store);
            let span = tracing::Span::current();
            let upserted = tokio::task::spawn_blocking(move || {
                span.in_scope(|| upsert_with_retry(store.as_ref(), &data))
            })
            .await;
            match upserted {
                Ok(Ok((alert, UpsertOutcome::Created))) => {
                    tally.created += 1;
                    tally.alerts.push(alert);
                }
                Ok(Ok((alert, UpsertOutcome::Updated))) => {
                    tally.updated += 1;
                    tally.alerts.push(alert);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Dropping alert for this run");
                    tally.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upsert task failed, dropping alert");
                    tally.failed += 1;
                }
            }
        }
    }
}

/// One retry on a write conflict; the retry re-reads the current row.
fn upsert_with_retry(
    store: &dyn EventStore,
    data: &AlertData,
) -> Result<(Alert, UpsertOutcome), PatternError> {
    let conflict = match store.upsert_alert(data) {
        Ok(result) => return Ok(result),
        Err(StoreError::Conflict(reason)) => reason,
        Err(e) => return Err(upsert_failure(data, e)),
    };
    tracing::debug!(key = %data.key, reason = %conflict, "Upsert conflict, retrying once");
    store.upsert_alert(data).map_err(|e| upsert_failure(data, e))
}

fn fetch_failed(target: PairTarget, tally: &mut RunTally) {
    tracing::debug!(pair = %target, reason = ?SkipReason::FetchFailed, "Pair skipped");
    tally.skipped += 1;
}

fn fetch_failure(err: StoreError) -> PatternError {
    PatternError::FetchFailure(err.to_string())
}

fn upsert_failure(data: &AlertData, err: StoreError) -> PatternError {
    match err {
        StoreError::Database(db) => PatternError::Database(db),
        other => PatternError::UpsertConflict {
            key: data.key.to_string(),
            reason: other.to_string(),
        },
    }
}
