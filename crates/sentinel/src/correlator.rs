//! Evidence → signals.
//!
//! [`Correlator::correlate`] is a pure function of the EvidenceCall list and
//! the injected topology: the same list always yields the same set. Each
//! matcher only looks at calls made for its own [`Expectation`].

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{LogLabels, SentinelConfig, Thresholds, Topology};
use crate::evidence::{Evidence, MetricSample, TimeRange};
use crate::playbook::{Expectation, RECONCILE_OK};
use crate::scheduler::EvidenceCall;
use crate::signal::{ChangeKind, Resource, SignalKey, SignalSet};

const NODE_LABELS: &[&str] = &["k8s_node_name", "node", "host_name"];
const DATA_LOSS_NEEDLES: &[&str] = &["corrupt", "no space left on device", "could not write"];
/// PostgreSQL severity prefixes. Only meaningful in the database namespace;
/// elsewhere a `panic:` is an ordinary application crash.
const POSTGRES_SEVERITIES: &[&str] = &["PANIC:", "FATAL:"];
const DATABASE_NAMESPACE: &str = "database";

#[derive(Debug, Clone)]
pub struct Correlator {
    topology: Topology,
    thresholds: Thresholds,
    restart_threshold: f64,
    log_labels: LogLabels,
}

impl Correlator {
    #[must_use]
    pub fn new(
        topology: Topology,
        thresholds: Thresholds,
        restart_threshold: f64,
        log_labels: LogLabels,
    ) -> Self {
        Self {
            topology,
            thresholds,
            restart_threshold,
            log_labels,
        }
    }

    #[must_use]
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self::new(
            config.topology.clone(),
            config.thresholds,
            config.restart_threshold,
            config.log_labels.clone(),
        )
    }

    /// Fold every call into one signal set.
    ///
    /// Successful calls go through their step's matcher. A step whose final
    /// attempt failed because a backend could not answer yields
    /// `EvidenceUnavailable`.
    #[must_use]
    pub fn correlate(&self, calls: &[EvidenceCall]) -> SignalSet {
        let mut signals = SignalSet::new();

        for call in calls {
            if let Ok(evidence) = &call.outcome {
                signals.merge(self.observe(call.expect, evidence, &call.range));
            }
        }

        let mut last_attempt: BTreeMap<usize, &EvidenceCall> = BTreeMap::new();
        for call in calls {
            last_attempt.insert(call.step_index, call);
        }
        for call in last_attempt.values() {
            if let Err(err) = &call.outcome {
                if err.is_retryable() {
                    signals.flag(SignalKey::EvidenceUnavailable {
                        source: err.backend(),
                        reason: err.reason(),
                    });
                }
            }
        }

        debug!(calls = calls.len(), signals = signals.len(), "Correlated evidence");
        signals
    }

    /// Signals from one successful result.
    #[must_use]
    pub fn observe(&self, expect: Expectation, evidence: &Evidence, range: &TimeRange) -> SignalSet {
        let mut out = SignalSet::new();
        match expect {
            Expectation::CrashLogs => self.crash_logs(evidence, &mut out),
            Expectation::TerminationReason => termination_reason(evidence, &mut out),
            Expectation::RestartCount => self.restart_count(evidence, &mut out),
            Expectation::WorkloadChanges => workload_changes(evidence, range, &mut out),
            Expectation::NodeUtilization(resource) => self.node_utilization(resource, evidence, &mut out),
            Expectation::NodeConditions => node_conditions(evidence, &mut out),
            Expectation::EndpointAvailability => endpoint_availability(evidence, &mut out),
            Expectation::PodPhase => pod_phase(evidence, &mut out),
            Expectation::UpstreamErrors => self.upstream_errors(evidence, &mut out),
            Expectation::ReconcileLogs => reconcile_logs(evidence, &mut out),
            Expectation::ReconcileStatus => reconcile_status(evidence, &mut out),
        }
        out
    }

    fn crash_logs(&self, evidence: &Evidence, out: &mut SignalSet) {
        for entry in evidence.lines() {
            let line = entry.line.to_ascii_lowercase();
            if line.contains("oomkilled") || line.contains("out of memory") {
                let pod = entry
                    .labels
                    .get(&self.log_labels.pod)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                out.flag(SignalKey::OomKilled { pod });
            }
            let namespace = entry
                .labels
                .get(&self.log_labels.namespace)
                .map_or("unknown", String::as_str);
            let postgres_error = namespace == DATABASE_NAMESPACE
                && POSTGRES_SEVERITIES.iter().any(|p| entry.line.contains(p));
            if postgres_error || DATA_LOSS_NEEDLES.iter().any(|n| line.contains(n)) {
                out.flag(SignalKey::DataLossRisk {
                    namespace: namespace.to_string(),
                });
            }
        }
    }

    fn restart_count(&self, evidence: &Evidence, out: &mut SignalSet) {
        for sample in evidence.latest_samples() {
            let pod = label_or_unknown(sample, &["pod"]);
            if sample.value >= self.restart_threshold {
                out.graded(SignalKey::PodCrashLooping { pod }, sample.value.round());
            } else if sample.value < 0.5 {
                out.flag(SignalKey::PodCrashLooping { pod }.resolution());
            }
        }
    }

    fn node_utilization(&self, resource: Resource, evidence: &Evidence, out: &mut SignalSet) {
        for sample in evidence.latest_samples() {
            let node = label_or_unknown(sample, NODE_LABELS);
            let ratio = if sample.value > 1.0 {
                sample.value / 100.0
            } else {
                sample.value
            };
            let threshold = self.thresholds.for_role(self.topology.role_of(&node));
            let key = SignalKey::NodeSaturated { node, resource };
            if ratio >= threshold {
                out.graded(key, ratio);
            } else {
                out.graded(key.resolution(), ratio);
            }
        }
    }

    fn upstream_errors(&self, evidence: &Evidence, out: &mut SignalSet) {
        let mut counts: BTreeMap<String, f64> = BTreeMap::new();
        for entry in evidence.lines() {
            let namespace = entry
                .labels
                .get(&self.log_labels.namespace)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            *counts.entry(namespace).or_default() += 1.0;
        }
        for (namespace, count) in counts {
            out.graded(SignalKey::UpstreamErrors { namespace }, count);
        }
    }
}

fn label_or_unknown(sample: &MetricSample, keys: &[&str]) -> String {
    sample.label(keys).unwrap_or("unknown").to_string()
}

fn termination_reason(evidence: &Evidence, out: &mut SignalSet) {
    for sample in evidence.latest_samples() {
        if sample.value > 0.0 && sample.label(&["reason"]) == Some("OOMKilled") {
            out.flag(SignalKey::OomKilled {
                pod: label_or_unknown(sample, &["pod"]),
            });
        }
    }
}

/// A generation or replica count that moved inside the window.
fn workload_changes(evidence: &Evidence, range: &TimeRange, out: &mut SignalSet) {
    let mut series: BTreeMap<(String, String), Vec<&MetricSample>> = BTreeMap::new();
    for sample in evidence.samples() {
        let metric = sample.label(&["__name__"]).unwrap_or_default().to_string();
        let workload = match (sample.label(&["namespace"]), sample.label(&["deployment"])) {
            (Some(ns), Some(d)) => format!("{ns}/{d}"),
            (None, Some(d)) => d.to_string(),
            _ => continue,
        };
        series.entry((metric, workload)).or_default().push(sample);
    }

    for ((metric, workload), mut points) in series {
        points.sort_by_key(|s| s.timestamp);
        let changed = points
            .windows(2)
            .any(|w| (w[1].value - w[0].value).abs() > f64::EPSILON && range.contains(w[1].timestamp));
        if !changed {
            continue;
        }
        let change = if metric.contains("replicas") {
            ChangeKind::Scale
        } else {
            ChangeKind::Rollout
        };
        out.flag(SignalKey::RecentChange { workload, change });
    }
}

fn node_conditions(evidence: &Evidence, out: &mut SignalSet) {
    for sample in evidence.latest_samples() {
        if sample.value <= 0.0 {
            continue;
        }
        let resource = match sample.label(&["condition"]) {
            Some("MemoryPressure") => Resource::Memory,
            Some("DiskPressure") => Resource::Disk,
            Some("PIDPressure") => Resource::Pid,
            _ => continue,
        };
        out.flag(SignalKey::NodePressure {
            node: label_or_unknown(sample, NODE_LABELS),
            resource,
        });
    }
}

fn endpoint_availability(evidence: &Evidence, out: &mut SignalSet) {
    for sample in evidence.latest_samples() {
        if sample.value > 0.0 {
            continue;
        }
        let endpoint = label_or_unknown(sample, &["endpoint", "service"]);
        let service = match sample.label(&["namespace"]) {
            Some(ns) => format!("{ns}/{endpoint}"),
            None => endpoint,
        };
        out.flag(SignalKey::ServiceOutage { service });
    }
}

fn pod_phase(evidence: &Evidence, out: &mut SignalSet) {
    for sample in evidence.latest_samples() {
        if sample.value <= 0.0 {
            continue;
        }
        out.flag(SignalKey::PodStuck {
            pod: label_or_unknown(sample, &["pod"]),
            phase: label_or_unknown(sample, &["phase"]),
        });
    }
}

/// The newest line per Flux object decides between failed and recovered.
fn reconcile_logs(evidence: &Evidence, out: &mut SignalSet) {
    let mut latest: BTreeMap<String, bool> = BTreeMap::new();
    for entry in evidence.lines() {
        let parsed: Option<Value> = serde_json::from_str(&entry.line).ok();
        let object = parsed
            .as_ref()
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("flux")
            .to_string();

        let lower = entry.line.to_ascii_lowercase();
        let succeeded = RECONCILE_OK
            .iter()
            .any(|n| lower.contains(&n.to_ascii_lowercase()));
        let failed = parsed
            .as_ref()
            .and_then(|v| v.get("level"))
            .and_then(Value::as_str)
            .is_some_and(|level| level == "error")
            || lower.contains("fail")
            || lower.contains("error");

        if succeeded {
            latest.insert(object, true);
        } else if failed {
            latest.insert(object, false);
        }
    }

    for (object, ok) in latest {
        let key = SignalKey::ReconciliationFailed { object };
        if ok {
            out.flag(key.resolution());
        } else {
            out.flag(key);
        }
    }
}

fn reconcile_status(evidence: &Evidence, out: &mut SignalSet) {
    for sample in evidence.latest_samples() {
        if sample.value <= 0.0 {
            continue;
        }
        let key = SignalKey::ReconciliationFailed {
            object: label_or_unknown(sample, &["name"]),
        };
        match sample.label(&["status"]) {
            Some("False") => out.flag(key),
            Some("True") => out.flag(key.resolution()),
            _ => {}
        }
    }
}
