//! Budgeted step scheduler.
//!
//! One investigation walks `Selecting → Executing → Evaluating →
//! {Continuing | Stopped}`. Steps run strictly one at a time; every issued
//! query is counted before the next one starts and the count never exceeds
//! [`MAX_EVIDENCE_CALLS`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::Alert;
use crate::config::{LogLabels, SentinelConfig};
use crate::correlator::Correlator;
use crate::evidence::{Evidence, EvidenceError, EvidenceQuery, EvidenceSource, Source, TimeRange};
use crate::playbook::{Attempt, Decision, Expectation, FallbackReason, PlaybookLibrary, Step};
use crate::report::Finding;
use crate::severity::classify;

/// Hard ceiling on EvidenceCalls per investigation.
pub const MAX_EVIDENCE_CALLS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvestigationError {
    #[error("investigation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PlaybookExhausted,
    BudgetExhausted,
    SufficientEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Selecting,
    Executing,
    Evaluating,
    Continuing,
    Stopped(StopReason),
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Selecting | Self::Evaluating | Self::Continuing, Self::Executing | Self::Stopped(_))
                | (Self::Executing, Self::Evaluating)
                | (Self::Evaluating, Self::Continuing)
        )
    }
}

/// One executed (or attempted) query.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceCall {
    pub seq: usize,
    /// Position of the step within its playbook
    pub step_index: usize,
    pub step: &'static str,
    pub expect: Expectation,
    pub attempt: Attempt,
    pub source: Source,
    /// Resolved expression, or the raw template when it could not be resolved
    pub query: String,
    pub range: TimeRange,
    pub outcome: Result<Evidence, EvidenceError>,
    /// Whether the call was issued and charged against the budget
    pub counted: bool,
}

/// The trace of one investigation, up to Stopped.
#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    /// The id of the alert under investigation
    pub id: Uuid,
    pub playbook: &'static str,
    pub fallback: Option<FallbackReason>,
    pub budget: usize,
    pub calls: Vec<EvidenceCall>,
    pub phases: Vec<Phase>,
    pub stop_reason: StopReason,
}

impl Investigation {
    /// Calls charged against the budget.
    #[must_use]
    pub fn calls_used(&self) -> usize {
        self.calls.iter().filter(|c| c.counted).count()
    }
}

#[derive(Debug, Clone)]
pub struct InvestigatorSettings {
    pub budget: usize,
    pub call_timeout: Duration,
    pub lookback: Duration,
    pub log_labels: LogLabels,
}

impl Default for InvestigatorSettings {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

impl InvestigatorSettings {
    #[must_use]
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            budget: config.budget.min(MAX_EVIDENCE_CALLS),
            call_timeout: config.call_timeout(),
            lookback: config.lookback(),
            log_labels: config.log_labels.clone(),
        }
    }
}

struct Walk {
    phase: Phase,
    phases: Vec<Phase>,
    calls: Vec<EvidenceCall>,
    used: usize,
}

impl Walk {
    fn new() -> Self {
        Self {
            phase: Phase::Selecting,
            phases: vec![Phase::Selecting],
            calls: Vec::new(),
            used: 0,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "Investigation transition");
        self.phase = next;
        self.phases.push(next);
    }

    fn record(&mut self, call: EvidenceCall) {
        self.calls.push(call);
    }

    fn next_seq(&self) -> usize {
        self.calls.len() + 1
    }
}

/// Runs investigations. Cheap to clone; clones share the evidence source,
/// the playbook library and the correlator.
#[derive(Clone)]
pub struct Investigator {
    source: Arc<dyn EvidenceSource>,
    library: Arc<PlaybookLibrary>,
    correlator: Arc<Correlator>,
    settings: InvestigatorSettings,
}

impl Investigator {
    #[must_use]
    pub fn new(
        source: Arc<dyn EvidenceSource>,
        library: Arc<PlaybookLibrary>,
        correlator: Correlator,
        settings: InvestigatorSettings,
    ) -> Self {
        Self {
            source,
            library,
            correlator: Arc::new(correlator),
            settings,
        }
    }

    #[must_use]
    pub fn from_config(source: Arc<dyn EvidenceSource>, config: &SentinelConfig) -> Self {
        Self::new(
            source,
            Arc::new(PlaybookLibrary::standard()),
            Correlator::from_config(config),
            InvestigatorSettings::from_config(config),
        )
    }

    #[must_use]
    pub fn library(&self) -> &PlaybookLibrary {
        &self.library
    }

    #[must_use]
    pub fn settings(&self) -> &InvestigatorSettings {
        &self.settings
    }

    /// Run an alert to a Finding.
    ///
    /// Always produces a Finding unless cancelled; a cancelled investigation
    /// is discarded.
    pub async fn investigate(
        &self,
        alert: &Alert,
        cancel: &CancellationToken,
    ) -> Result<Finding, InvestigationError> {
        let trace = self.run(alert, cancel).await?;
        if cancel.is_cancelled() {
            return Err(InvestigationError::Cancelled);
        }

        let signals = self.correlator.correlate(&trace.calls);
        let classification = classify(&signals);

        info!(
            investigation = %trace.id,
            alert_kind = %alert.kind,
            playbook = trace.playbook,
            calls = trace.calls_used(),
            severity = %classification.severity,
            inconclusive = classification.inconclusive,
            "Investigation complete"
        );

        Ok(Finding::compose(alert, &trace, &signals, classification))
    }

    /// Walk the selected playbook up to Stopped, without correlating.
    pub async fn run(
        &self,
        alert: &Alert,
        cancel: &CancellationToken,
    ) -> Result<Investigation, InvestigationError> {
        let id = alert.id;
        let selection = self.library.select(alert);
        let playbook = selection.playbook;
        let budget = self.settings.budget.min(MAX_EVIDENCE_CALLS);
        let as_of = Utc::now();

        if let Some(reason) = selection.fallback {
            info!(
                investigation = %id,
                alert_kind = %alert.kind,
                reason = ?reason,
                "Routing to fallback playbook"
            );
        }
        debug!(
            investigation = %id,
            playbook = playbook.name,
            budget,
            "Playbook selected"
        );

        let mut walk = Walk::new();
        let mut stop = StopReason::PlaybookExhausted;

        'steps: for (index, step) in playbook.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(investigation = %id, step = step.name, "Cancelled at step boundary");
                return Err(InvestigationError::Cancelled);
            }
            if index > 0 {
                walk.advance(Phase::Continuing);
            }

            let range = window_for(step, as_of, self.settings.lookback);
            let mut attempt = Attempt::Primary;

            loop {
                if walk.used >= budget {
                    stop = StopReason::BudgetExhausted;
                    break 'steps;
                }

                walk.advance(Phase::Executing);
                let decision = self
                    .execute_step(&mut walk, alert, step, index, attempt, range, cancel)
                    .await?;
                walk.advance(Phase::Evaluating);

                match decision {
                    Decision::Degrade if step.alternate.is_some() && attempt == Attempt::Primary => {
                        debug!(investigation = %id, step = step.name, "Degrading to alternate query");
                        attempt = Attempt::Alternate;
                    }
                    Decision::SkipRemaining => {
                        stop = StopReason::SufficientEvidence;
                        break 'steps;
                    }
                    Decision::Degrade | Decision::Continue => break,
                }
            }
        }

        walk.advance(Phase::Stopped(stop));
        info!(
            investigation = %id,
            playbook = playbook.name,
            calls = walk.used,
            stop_reason = ?stop,
            "Investigation stopped"
        );

        Ok(Investigation {
            id,
            playbook: playbook.name,
            fallback: selection.fallback,
            budget,
            calls: walk.calls,
            phases: walk.phases,
            stop_reason: stop,
        })
    }

    /// Issue one query for `step` and decide where to go next.
    async fn execute_step(
        &self,
        walk: &mut Walk,
        alert: &Alert,
        step: &Step,
        index: usize,
        attempt: Attempt,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Decision, InvestigationError> {
        let resolved = step.resolve(attempt, &alert.target, &self.settings.log_labels, range);
        let query = match resolved {
            Ok(Some(query)) => query,
            Ok(None) => return Ok(Decision::Continue),
            Err(err) => {
                let template = step.template(attempt);
                let source = template.map_or(Source::Metrics, |t| t.source());
                warn!(step = step.name, error = %err, "Skipping step with unresolvable query");
                walk.record(EvidenceCall {
                    seq: walk.next_seq(),
                    step_index: index,
                    step: step.name,
                    expect: step.expect,
                    attempt,
                    source,
                    query: template
                        .map(|t| t.text(&self.settings.log_labels))
                        .unwrap_or_default(),
                    range,
                    outcome: Err(EvidenceError::MalformedQuery {
                        backend: source,
                        reason: err.to_string(),
                    }),
                    counted: false,
                });
                return Ok(Decision::Continue);
            }
        };

        walk.used += 1;
        debug!(
            step = step.name,
            attempt = ?attempt,
            source = %query.source,
            query = %query.expression,
            calls = walk.used,
            "Issuing evidence call"
        );
        let outcome = self.call(&query, cancel).await?;

        let decision = match &outcome {
            Ok(evidence) => step.branch(evidence, attempt),
            Err(err) => {
                warn!(step = step.name, attempt = ?attempt, error = %err, "Evidence call failed");
                if err.is_retryable() && attempt == Attempt::Primary && step.alternate.is_some() {
                    Decision::Degrade
                } else {
                    Decision::Continue
                }
            }
        };

        walk.record(EvidenceCall {
            seq: walk.next_seq(),
            step_index: index,
            step: step.name,
            expect: step.expect,
            attempt,
            source: query.source,
            query: query.expression,
            range,
            outcome,
            counted: true,
        });

        Ok(decision)
    }

    /// One adapter call bounded by the per-call timeout and the cancel token.
    async fn call(
        &self,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
    ) -> Result<Result<Evidence, EvidenceError>, InvestigationError> {
        let timeout = self.settings.call_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(InvestigationError::Cancelled),
            result = tokio::time::timeout(timeout, self.source.query(query)) => {
                Ok(result.unwrap_or_else(|_| Err(EvidenceError::Timeout {
                    backend: query.source,
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })))
            }
        }
    }
}

/// Query window for `step`, ending at `as_of`.
#[must_use]
pub fn window_for(step: &Step, as_of: DateTime<Utc>, default: Duration) -> TimeRange {
    TimeRange::ending_at(as_of, step.lookback.unwrap_or(default))
}
