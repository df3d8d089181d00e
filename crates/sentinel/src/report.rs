//! Findings and their rendered reports.
//!
//! A report is a fixed-shape block of at most ten lines:
//!
//! ```text
//! [WARNING] CrashLoop database/x: x was OOM killed
//! - OOMKilled(pod=x)=true
//! Next: Raise the memory limit of x or reduce its working set
//! Evidence calls: 1/5 · crash-loop
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use uuid::Uuid;

use crate::alert::{Alert, AlertKind};
use crate::playbook::FallbackReason;
use crate::scheduler::{Investigation, StopReason};
use crate::severity::{Classification, Severity};
use crate::signal::{ChangeKind, Signal, SignalKey, SignalKind, SignalSet, SignalValue};

/// Upper bound on rendered report lines.
pub const MAX_REPORT_LINES: usize = 10;

/// Longest single line before truncation.
const MAX_LINE_CHARS: usize = 200;

/// The terminal artifact of one investigation.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub id: Uuid,
    pub alert: Alert,
    pub severity: Severity,
    /// Observed signals, most important first
    pub signals: Vec<Signal>,
    pub inconclusive: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub evidence_calls: usize,
    pub budget: usize,
    pub playbook: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    pub stop_reason: StopReason,
    pub completed_at: DateTime<Utc>,
}

impl Finding {
    #[must_use]
    pub fn compose(
        alert: &Alert,
        trace: &Investigation,
        signals: &SignalSet,
        classification: Classification,
    ) -> Self {
        let cause = classification
            .cause
            .as_ref()
            .and_then(|key| signals.get(key).map(|value| (key, value)));
        let summary = match cause {
            Some((key, value)) if !classification.inconclusive => headline(key, value),
            _ => format!(
                "data doesn't show a clear cause; recommend manual check of {}",
                manual_check(alert)
            ),
        };
        let recommendation = if classification.severity.is_actionable() {
            classification.cause.as_ref().map(next_action)
        } else {
            None
        };

        Self {
            id: trace.id,
            alert: alert.clone(),
            severity: classification.severity,
            signals: signals.to_vec(),
            inconclusive: classification.inconclusive,
            summary,
            recommendation,
            evidence_calls: trace.calls_used(),
            budget: trace.budget,
            playbook: trace.playbook,
            fallback: trace.fallback,
            stop_reason: trace.stop_reason,
            completed_at: Utc::now(),
        }
    }

    /// `CrashLoop database/x`
    #[must_use]
    pub fn title(&self) -> String {
        format!("{} {}", self.alert.kind, self.alert.target.subject())
    }
}

fn headline(key: &SignalKey, value: SignalValue) -> String {
    match key {
        SignalKey::ServiceOutage { service } => format!("{service} has no available endpoints"),
        SignalKey::DataLossRisk { namespace } => {
            format!("possible data loss in {namespace} (storage or WAL errors)")
        }
        SignalKey::OomKilled { pod } => format!("{pod} was OOM killed"),
        SignalKey::NodeSaturated { node, resource } => match value {
            SignalValue::Graded(v) => format!("{node} {} saturated at {v:.2}", resource.as_str()),
            SignalValue::Flag(_) => format!("{node} {} saturated", resource.as_str()),
        },
        SignalKey::NodePressure { node, resource } => {
            format!("{node} reports {} pressure", resource.as_str())
        }
        SignalKey::PodCrashLooping { pod } => format!("{pod} restarted {value} times"),
        SignalKey::ReconciliationFailed { object } => format!("{object} is failing to reconcile"),
        SignalKey::Resolved { condition, subject } => {
            format!("{} on {subject} has cleared", describe_condition(*condition))
        }
        SignalKey::PodStuck { pod, phase } => format!("{pod} stuck in {phase}"),
        SignalKey::RecentChange { workload, change } => match change {
            ChangeKind::Rollout => format!("{workload} rolled out recently"),
            ChangeKind::Scale => format!("{workload} was scaled recently"),
        },
        SignalKey::UpstreamErrors { namespace } => format!("{value} upstream errors in {namespace}"),
        SignalKey::EvidenceUnavailable { source, reason } => {
            format!("{source} backend unavailable: {reason}")
        }
    }
}

fn describe_condition(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::OomKilled => "OOM kills",
        SignalKind::NodeSaturated => "saturation",
        SignalKind::NodePressure => "pressure",
        SignalKind::PodCrashLooping => "crash looping",
        SignalKind::ReconciliationFailed => "reconciliation failure",
        _ => kind.as_str(),
    }
}

fn next_action(key: &SignalKey) -> String {
    match key {
        SignalKey::ServiceOutage { service } => {
            format!("Check readiness probes and the selector of {service}; no pod is serving it")
        }
        SignalKey::DataLossRisk { namespace } => {
            format!("Check volume capacity and database logs in {namespace} before restarting anything")
        }
        SignalKey::OomKilled { pod } => {
            format!("Raise the memory limit of {pod} or reduce its working set")
        }
        SignalKey::NodeSaturated { node, resource } => format!(
            "Find the heaviest {} consumers on {node} and move or throttle them",
            resource.as_str()
        ),
        SignalKey::NodePressure { node, resource } => format!(
            "Check kubelet eviction thresholds and {} consumers on {node}",
            resource.as_str()
        ),
        SignalKey::PodCrashLooping { pod } => {
            format!("Read the previous container logs of {pod} for the exit cause")
        }
        SignalKey::ReconciliationFailed { object } => {
            format!("Run `flux reconcile` for {object} and fix the reported error")
        }
        other => format!("Inspect {}", other.subject()),
    }
}

fn manual_check(alert: &Alert) -> String {
    let subject = alert.target.subject();
    match alert.kind {
        AlertKind::CrashLoop => format!("pod events and previous logs for {subject}"),
        AlertKind::ResourceHigh => format!("resource usage on {subject}"),
        AlertKind::ServiceUnreachable => format!("endpoints and ingress for {subject}"),
        AlertKind::SyncFailure => "Flux reconciliation status (`flux get all -A`)".to_string(),
        AlertKind::Unknown => format!("the alert source for {subject}"),
    }
}

/// Renders Findings into length-bounded text.
#[derive(Debug, Clone, Copy)]
pub struct ReportComposer {
    max_evidence_lines: usize,
}

impl Default for ReportComposer {
    fn default() -> Self {
        Self::new(6)
    }
}

impl ReportComposer {
    /// `max_evidence_lines` is capped so the report never exceeds ten lines.
    #[must_use]
    pub fn new(max_evidence_lines: usize) -> Self {
        Self {
            max_evidence_lines: max_evidence_lines.clamp(1, MAX_REPORT_LINES - 3),
        }
    }

    /// Total: always yields a report, even for an inconclusive Finding.
    #[must_use]
    pub fn render(&self, finding: &Finding) -> String {
        let mut lines = Vec::with_capacity(MAX_REPORT_LINES);
        lines.push(format!(
            "[{}] {}: {}",
            finding.severity.tag(),
            finding.title(),
            finding.summary
        ));

        let evidence: Vec<String> = if finding.signals.is_empty() {
            vec![format!(
                "- no matching evidence in {} call(s)",
                finding.evidence_calls
            )]
        } else {
            finding.signals.iter().map(|s| format!("- {s}")).collect()
        };
        if evidence.len() > self.max_evidence_lines {
            let shown = self.max_evidence_lines - 1;
            lines.extend(evidence[..shown].iter().cloned());
            lines.push(format!("- … and {} more", evidence.len() - shown));
        } else {
            lines.extend(evidence);
        }

        if finding.severity.is_actionable() {
            if let Some(next) = &finding.recommendation {
                lines.push(format!("Next: {next}"));
            }
        }

        let mut footer = format!(
            "Evidence calls: {}/{} · {}",
            finding.evidence_calls, finding.budget, finding.playbook
        );
        if finding.fallback.is_some() {
            footer.push_str(" (fallback)");
        }
        lines.push(footer);

        let mut out = String::new();
        for line in lines.iter().take(MAX_REPORT_LINES) {
            let _ = writeln!(out, "{}", truncate(line, MAX_LINE_CHARS));
        }
        out.truncate(out.trim_end().len());
        out
    }

    /// Package a Finding for chat delivery.
    #[must_use]
    pub fn notify_event(&self, finding: &Finding) -> notify::NotifyEvent {
        let mut context = BTreeMap::new();
        context.insert("alert_kind".to_string(), finding.alert.kind.as_str().to_string());
        context.insert("target".to_string(), finding.alert.target.subject());
        context.insert("playbook".to_string(), finding.playbook.to_string());
        context.insert(
            "evidence_calls".to_string(),
            format!("{}/{}", finding.evidence_calls, finding.budget),
        );

        notify::NotifyEvent::Finding {
            investigation_id: finding.id.to_string(),
            severity: finding.severity.into(),
            title: format!("{}: {}", finding.title(), finding.summary),
            body: self.render(finding),
            inconclusive: finding.inconclusive,
            context,
            timestamp: finding.completed_at,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Target;
    use crate::evidence::Source;
    use crate::severity::classify;
    use crate::signal::Resource;

    fn trace(calls: usize) -> Investigation {
        Investigation {
            id: Uuid::new_v4(),
            playbook: "crash-loop",
            fallback: None,
            budget: 5,
            calls: Vec::new(),
            phases: Vec::new(),
            stop_reason: if calls == 5 {
                StopReason::BudgetExhausted
            } else {
                StopReason::SufficientEvidence
            },
        }
    }

    fn alert(kind: AlertKind) -> Alert {
        Alert::new(
            kind,
            Target {
                namespace: Some("database".to_string()),
                pod: Some("x".to_string()),
                ..Target::default()
            },
            "test",
        )
    }

    fn finding(kind: AlertKind, signals: &SignalSet) -> Finding {
        Finding::compose(&alert(kind), &trace(1), signals, classify(signals))
    }

    #[test]
    fn test_warning_report_has_one_next_action() {
        let mut signals = SignalSet::new();
        signals.flag(SignalKey::OomKilled {
            pod: "x".to_string(),
        });
        let finding = finding(AlertKind::CrashLoop, &signals);
        let report = ReportComposer::default().render(&finding);
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines[0], "[WARNING] CrashLoop database/x: x was OOM killed");
        assert_eq!(lines[1], "- OOMKilled(pod=x)=true");
        assert_eq!(lines.iter().filter(|l| l.starts_with("Next:")).count(), 1);
        assert_eq!(lines.last().copied(), Some("Evidence calls: 0/5 · crash-loop"));
    }

    #[test]
    fn test_inconclusive_report() {
        let mut signals = SignalSet::new();
        signals.flag(SignalKey::EvidenceUnavailable {
            source: Source::Logs,
            reason: "connection refused".to_string(),
        });
        let finding = finding(AlertKind::ServiceUnreachable, &signals);
        assert!(finding.inconclusive);
        assert!(finding.recommendation.is_none());

        let report = ReportComposer::default().render(&finding);
        assert!(report.starts_with(
            "[INFO] ServiceUnreachable database/x: data doesn't show a clear cause; recommend manual check of endpoints and ingress for database/x"
        ));
        assert!(!report.contains("Next:"));
    }

    #[test]
    fn test_empty_signal_set_still_renders() {
        let finding = finding(AlertKind::Unknown, &SignalSet::new());
        let report = ReportComposer::default().render(&finding);
        assert!(report.contains("no matching evidence"));
    }

    #[test]
    fn test_report_is_bounded() {
        let mut signals = SignalSet::new();
        for i in 0..20 {
            signals.graded(
                SignalKey::NodeSaturated {
                    node: format!("node-{i}"),
                    resource: Resource::Cpu,
                },
                0.99,
            );
        }
        let finding = finding(AlertKind::ResourceHigh, &signals);
        let report = ReportComposer::new(50).render(&finding);
        let lines: Vec<&str> = report.lines().collect();

        assert!(lines.len() <= MAX_REPORT_LINES);
        assert!(lines.iter().any(|l| l.contains("more")));
        assert!(lines.iter().any(|l| l.starts_with("Next:")));
    }

    #[test]
    fn test_resolved_has_no_next_action() {
        let mut signals = SignalSet::new();
        signals.flag(
            SignalKey::ReconciliationFailed {
                object: "apps".to_string(),
            }
            .resolution(),
        );
        let finding = finding(AlertKind::SyncFailure, &signals);
        assert_eq!(finding.severity, Severity::Resolved);
        assert_eq!(finding.summary, "reconciliation failure on apps has cleared");
        assert!(!ReportComposer::default().render(&finding).contains("Next:"));
    }

    #[test]
    fn test_notify_event() {
        let mut signals = SignalSet::new();
        signals.flag(SignalKey::ServiceOutage {
            service: "web/api".to_string(),
        });
        let finding = finding(AlertKind::ServiceUnreachable, &signals);
        let event = ReportComposer::default().notify_event(&finding);

        assert_eq!(event.severity(), notify::Severity::Critical);
        assert!(event.title().contains("web/api has no available endpoints"));
        assert!(event.body().starts_with("[CRITICAL]"));
    }
}
