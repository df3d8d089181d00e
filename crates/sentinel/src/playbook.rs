//! Playbook library.
//!
//! A playbook is an ordered list of steps for one alert kind. Each step names
//! the evidence it expects, a query template resolved against the alert's
//! target, an optional alternate query used when the primary comes back
//! empty or fails, and a stop predicate evaluated on that step's own result.
//!
//! Template placeholders:
//! - `{namespace}`, `{workload}`, `{pod}`, `{node}`: required target fields
//! - `{namespace?}` etc.: optional, rendered as `.+` (only inside `=~` matchers)
//! - `{lookback}`: the step's window as a PromQL duration

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::alert::{Alert, AlertKind, Target, TargetField};
use crate::config::LogLabels;
use crate::evidence::{Evidence, EvidenceQuery, Source, TimeRange};
use crate::signal::Resource;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z]+)(\?)?\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("query template needs `{}` but the alert does not name one", .0.as_str())]
    MissingField(TargetField),
}

/// Shape of evidence a step gathers; selects the correlator matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    CrashLogs,
    TerminationReason,
    RestartCount,
    WorkloadChanges,
    NodeUtilization(Resource),
    NodeConditions,
    EndpointAvailability,
    PodPhase,
    UpstreamErrors,
    ReconcileLogs,
    ReconcileStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelRole {
    Namespace,
    Pod,
    Container,
}

impl LabelRole {
    fn resolve(self, labels: &LogLabels) -> &str {
        match self {
            Self::Namespace => &labels.namespace,
            Self::Pod => &labels.pod,
            Self::Container => &labels.container,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "=~")]
    Regex,
}

impl MatchOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Regex => "=~",
        }
    }
}

/// One stream selector matcher, keyed by label role rather than label name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LabelMatch {
    pub role: LabelRole,
    pub op: MatchOp,
    pub value: &'static str,
}

/// A LogQL query: stream selector plus regex line filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogTemplate {
    pub selector: &'static [LabelMatch],
    pub filters: &'static [&'static str],
}

impl LogTemplate {
    fn text(&self, labels: &LogLabels) -> String {
        let selector = self
            .selector
            .iter()
            .map(|m| format!("{}{}\"{}\"", m.role.resolve(labels), m.op.as_str(), m.value))
            .collect::<Vec<_>>()
            .join(", ");
        let mut query = format!("{{{selector}}}");
        for filter in self.filters {
            query.push_str(" |~ `");
            query.push_str(filter);
            query.push('`');
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTemplate {
    Metrics(&'static str),
    Logs(LogTemplate),
}

impl QueryTemplate {
    #[must_use]
    pub fn source(&self) -> Source {
        match self {
            Self::Metrics(_) => Source::Metrics,
            Self::Logs(_) => Source::Logs,
        }
    }

    /// Template text with label roles resolved and placeholders left in.
    #[must_use]
    pub fn text(&self, labels: &LogLabels) -> String {
        match self {
            Self::Metrics(expr) => (*expr).to_string(),
            Self::Logs(log) => log.text(labels),
        }
    }

    /// Resolve into a concrete backend expression.
    pub fn render(
        &self,
        target: &Target,
        labels: &LogLabels,
        range: &TimeRange,
    ) -> Result<String, TemplateError> {
        fill(&self.text(labels), target, range)
    }
}

fn fill(template: &str, target: &Target, range: &TimeRange) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps.get(1).map_or("", |m| m.as_str());
        let optional = caps.get(2).is_some();

        let value = if name == "lookback" {
            range.promql_duration()
        } else if let Some(field) = TargetField::parse(name) {
            match target.get(field) {
                Some(v) => v.to_string(),
                None if optional => ".+".to_string(),
                None => return Err(TemplateError::MissingField(field)),
            }
        } else {
            continue;
        };

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Early-stop predicate over a single step result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum StopWhen {
    Never,
    /// Some line contains one of the needles (case-insensitive)
    AnyLineContains { needles: &'static [&'static str] },
    /// The newest line contains one of the needles (case-insensitive)
    LatestLineContains { needles: &'static [&'static str] },
    /// Some non-zero sample carries `label=value`
    LabelEquals {
        label: &'static str,
        value: &'static str,
    },
    /// The newest sample of some series is at or below `limit`
    LatestAtMost { limit: f64 },
}

impl StopWhen {
    #[must_use]
    pub fn matches(&self, evidence: &Evidence) -> bool {
        match self {
            Self::Never => false,
            Self::AnyLineContains { needles } => evidence
                .lines()
                .iter()
                .any(|e| contains_any(&e.line, needles)),
            Self::LatestLineContains { needles } => evidence
                .lines()
                .last()
                .is_some_and(|e| contains_any(&e.line, needles)),
            Self::LabelEquals { label, value } => evidence.samples().iter().any(|s| {
                s.value > 0.0 && s.labels.get(*label).is_some_and(|v| v == value)
            }),
            Self::LatestAtMost { limit } => evidence
                .latest_samples()
                .iter()
                .any(|s| s.value <= *limit),
        }
    }
}

fn contains_any(line: &str, needles: &[&str]) -> bool {
    let line = line.to_ascii_lowercase();
    needles
        .iter()
        .any(|n| line.contains(&n.to_ascii_lowercase()))
}

/// Which query of a step was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Attempt {
    Primary,
    Alternate,
}

/// Outcome of a step's branch predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Run the next step
    Continue,
    /// Sufficient evidence; stop the playbook
    SkipRemaining,
    /// Result did not match expectations; run the alternate query
    Degrade,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub name: &'static str,
    pub expect: Expectation,
    pub query: QueryTemplate,
    pub alternate: Option<QueryTemplate>,
    pub stop_when: StopWhen,
    /// Overrides the default lookback for this step
    pub lookback: Option<Duration>,
}

impl Step {
    pub(crate) fn new(name: &'static str, expect: Expectation, query: QueryTemplate) -> Self {
        Self {
            name,
            expect,
            query,
            alternate: None,
            stop_when: StopWhen::Never,
            lookback: None,
        }
    }

    fn or_else(mut self, alternate: QueryTemplate) -> Self {
        self.alternate = Some(alternate);
        self
    }

    fn stop_when(mut self, stop_when: StopWhen) -> Self {
        self.stop_when = stop_when;
        self
    }

    fn window(mut self, lookback: Duration) -> Self {
        self.lookback = Some(lookback);
        self
    }

    #[must_use]
    pub fn template(&self, attempt: Attempt) -> Option<&QueryTemplate> {
        match attempt {
            Attempt::Primary => Some(&self.query),
            Attempt::Alternate => self.alternate.as_ref(),
        }
    }

    /// Build the concrete query for `attempt`.
    pub fn resolve(
        &self,
        attempt: Attempt,
        target: &Target,
        labels: &LogLabels,
        range: TimeRange,
    ) -> Result<Option<EvidenceQuery>, TemplateError> {
        let Some(template) = self.template(attempt) else {
            return Ok(None);
        };
        let expression = template.render(target, labels, &range)?;
        Ok(Some(EvidenceQuery {
            source: template.source(),
            expression,
            range,
        }))
    }

    /// Branch predicate, evaluated on this step's result only.
    #[must_use]
    pub fn branch(&self, evidence: &Evidence, attempt: Attempt) -> Decision {
        if evidence.is_empty() && attempt == Attempt::Primary && self.alternate.is_some() {
            return Decision::Degrade;
        }
        if self.stop_when.matches(evidence) {
            Decision::SkipRemaining
        } else {
            Decision::Continue
        }
    }
}

#[derive(Debug, Clone)]
pub struct Playbook {
    pub name: &'static str,
    pub description: &'static str,
    /// Alert kind served; `None` for the fallback
    pub kind: Option<AlertKind>,
    /// Target fields without which the playbook cannot run
    pub requires: &'static [TargetField],
    pub steps: Vec<Step>,
}

impl Playbook {
    fn missing_field(&self, target: &Target) -> Option<TargetField> {
        self.requires
            .iter()
            .copied()
            .find(|f| target.get(*f).is_none())
    }
}

/// Why the fallback playbook was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum FallbackReason {
    UnknownKind,
    MissingTarget(TargetField),
}

#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub playbook: &'a Playbook,
    pub fallback: Option<FallbackReason>,
}

/// The static set of playbooks, built once at startup.
#[derive(Debug, Clone)]
pub struct PlaybookLibrary {
    playbooks: Vec<Playbook>,
    fallback: Playbook,
}

impl PlaybookLibrary {
    #[must_use]
    pub fn new(playbooks: Vec<Playbook>, fallback: Playbook) -> Self {
        Self {
            playbooks,
            fallback,
        }
    }

    /// The built-in catalogue.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(
            vec![
                crash_loop(),
                resource_pressure(),
                service_unreachable(),
                sync_failure(),
            ],
            broad_then_narrow(),
        )
    }

    /// Deterministic mapping from alert to exactly one playbook.
    #[must_use]
    pub fn select(&self, alert: &Alert) -> Selection<'_> {
        let Some(playbook) = self.playbooks.iter().find(|p| p.kind == Some(alert.kind)) else {
            debug!(alert_kind = %alert.kind, "No playbook for alert kind, using fallback");
            return Selection {
                playbook: &self.fallback,
                fallback: Some(FallbackReason::UnknownKind),
            };
        };

        if let Some(field) = playbook.missing_field(&alert.target) {
            debug!(
                playbook = playbook.name,
                missing = field.as_str(),
                "Alert target incomplete, using fallback"
            );
            return Selection {
                playbook: &self.fallback,
                fallback: Some(FallbackReason::MissingTarget(field)),
            };
        }

        Selection {
            playbook,
            fallback: None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Playbook> {
        self.playbooks.iter().chain(std::iter::once(&self.fallback))
    }

    #[must_use]
    pub fn fallback(&self) -> &Playbook {
        &self.fallback
    }

    /// Serializable listing for the API and CLI.
    #[must_use]
    pub fn describe(&self, labels: &LogLabels) -> Vec<PlaybookView> {
        self.iter()
            .map(|p| PlaybookView {
                name: p.name,
                description: p.description,
                kind: p.kind,
                requires: p.requires,
                steps: p
                    .steps
                    .iter()
                    .map(|s| StepView {
                        name: s.name,
                        expect: s.expect,
                        source: s.query.source(),
                        query: s.query.text(labels),
                        alternate: s.alternate.map(|a| a.text(labels)),
                        stop_when: s.stop_when,
                        lookback_secs: s.lookback.map(|d| d.as_secs()),
                    })
                    .collect(),
            })
            .collect()
    }
}

impl Default for PlaybookLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybookView {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<AlertKind>,
    pub requires: &'static [TargetField],
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub name: &'static str,
    pub expect: Expectation,
    pub source: Source,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate: Option<String>,
    pub stop_when: StopWhen,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_secs: Option<u64>,
}

// =============================================================================
// Catalogue
// =============================================================================

const NS: LabelMatch = LabelMatch {
    role: LabelRole::Namespace,
    op: MatchOp::Eq,
    value: "{namespace}",
};

const OOM_NEEDLES: &[&str] = &["OOMKilled", "Out of memory"];

pub(crate) const RECONCILE_OK: &[&str] = &[
    "Reconciliation finished",
    "stored artifact",
    "release reconciliation succeeded",
    "upgrade succeeded",
];

const POD_PHASE: &str = r#"sum by (namespace, pod, phase) (kube_pod_status_phase{namespace=~"{namespace?}", pod=~"{pod?}", phase=~"Pending|Failed|Unknown"}) > 0"#;

const NODE_CONDITIONS: &str = r#"kube_node_status_condition{node=~"{node?}", condition=~"MemoryPressure|DiskPressure|PIDPressure", status="true"} == 1"#;

const WORKLOAD_CHANGES: &str = r#"kube_deployment_status_observed_generation{namespace=~"{namespace?}", deployment=~"{workload?}"} or kube_deployment_spec_replicas{namespace=~"{namespace?}", deployment=~"{workload?}"}"#;

fn crash_loop() -> Playbook {
    Playbook {
        name: "crash-loop",
        description: "Container crash loops: OOM kills, fatal errors, restart churn, recent rollouts",
        kind: Some(AlertKind::CrashLoop),
        requires: &[TargetField::Namespace],
        steps: vec![
            Step::new(
                "crash-logs",
                Expectation::CrashLogs,
                QueryTemplate::Logs(LogTemplate {
                    selector: &[
                        NS,
                        LabelMatch {
                            role: LabelRole::Pod,
                            op: MatchOp::Regex,
                            value: "{pod?}",
                        },
                    ],
                    filters: &["(?i)oomkilled|out of memory|panic|fatal|no space left on device"],
                }),
            )
            .or_else(QueryTemplate::Logs(LogTemplate {
                selector: &[
                    NS,
                    LabelMatch {
                        role: LabelRole::Pod,
                        op: MatchOp::Regex,
                        value: "{workload?}.*",
                    },
                ],
                filters: &["(?i)oomkilled|out of memory|panic|fatal|no space left on device"],
            }))
            .stop_when(StopWhen::AnyLineContains {
                needles: OOM_NEEDLES,
            }),
            Step::new(
                "termination-reason",
                Expectation::TerminationReason,
                QueryTemplate::Metrics(
                    r#"max by (namespace, pod, reason) (kube_pod_container_status_last_terminated_reason{namespace="{namespace}", pod=~"{pod?}"})"#,
                ),
            )
            .stop_when(StopWhen::LabelEquals {
                label: "reason",
                value: "OOMKilled",
            }),
            Step::new(
                "restart-count",
                Expectation::RestartCount,
                QueryTemplate::Metrics(
                    r#"sum by (namespace, pod) (increase(kube_pod_container_status_restarts_total{namespace="{namespace}", pod=~"{pod?}"}[{lookback}]))"#,
                ),
            ),
            Step::new(
                "workload-changes",
                Expectation::WorkloadChanges,
                QueryTemplate::Metrics(WORKLOAD_CHANGES),
            )
            .window(Duration::from_secs(3600)),
        ],
    }
}

fn resource_pressure() -> Playbook {
    Playbook {
        name: "resource-pressure",
        description: "Node saturation: CPU, memory and root filesystem utilization, kubelet pressure conditions",
        kind: Some(AlertKind::ResourceHigh),
        requires: &[TargetField::Node],
        steps: vec![
            Step::new(
                "cpu-utilization",
                Expectation::NodeUtilization(Resource::Cpu),
                QueryTemplate::Metrics(
                    r#"1 - avg by (k8s_node_name) (system_cpu_utilization{state="idle", k8s_node_name="{node}"})"#,
                ),
            )
            .or_else(QueryTemplate::Metrics(
                r#"1 - avg by (k8s_node_name) ({__name__="system.cpu.utilization", state="idle", k8s_node_name="{node}"})"#,
            )),
            Step::new(
                "memory-utilization",
                Expectation::NodeUtilization(Resource::Memory),
                QueryTemplate::Metrics(
                    r#"sum by (k8s_node_name) (system_memory_usage{state="used", k8s_node_name="{node}"}) / sum by (k8s_node_name) (system_memory_usage{k8s_node_name="{node}"})"#,
                ),
            )
            .or_else(QueryTemplate::Metrics(
                r#"sum by (k8s_node_name) ({__name__="system.memory.usage", state="used", k8s_node_name="{node}"}) / sum by (k8s_node_name) ({__name__="system.memory.usage", k8s_node_name="{node}"})"#,
            )),
            Step::new(
                "disk-utilization",
                Expectation::NodeUtilization(Resource::Disk),
                QueryTemplate::Metrics(
                    r#"sum by (k8s_node_name) (system_filesystem_usage{state="used", mountpoint="/", k8s_node_name="{node}"}) / sum by (k8s_node_name) (system_filesystem_usage{mountpoint="/", k8s_node_name="{node}"})"#,
                ),
            )
            .or_else(QueryTemplate::Metrics(
                r#"sum by (k8s_node_name) ({__name__="system.filesystem.usage", state="used", mountpoint="/", k8s_node_name="{node}"}) / sum by (k8s_node_name) ({__name__="system.filesystem.usage", mountpoint="/", k8s_node_name="{node}"})"#,
            )),
            Step::new(
                "node-conditions",
                Expectation::NodeConditions,
                QueryTemplate::Metrics(NODE_CONDITIONS),
            ),
        ],
    }
}

fn service_unreachable() -> Playbook {
    Playbook {
        name: "service-unreachable",
        description: "Unreachable service: endpoint availability, stuck pods, upstream errors",
        kind: Some(AlertKind::ServiceUnreachable),
        requires: &[],
        steps: vec![
            Step::new(
                "endpoint-availability",
                Expectation::EndpointAvailability,
                QueryTemplate::Metrics(
                    r#"kube_endpoint_address_available{namespace=~"{namespace?}", endpoint=~"{workload?}"}"#,
                ),
            )
            .stop_when(StopWhen::LatestAtMost { limit: 0.0 }),
            Step::new("pod-phase", Expectation::PodPhase, QueryTemplate::Metrics(POD_PHASE)),
            Step::new(
                "upstream-errors",
                Expectation::UpstreamErrors,
                QueryTemplate::Logs(LogTemplate {
                    selector: &[LabelMatch {
                        role: LabelRole::Namespace,
                        op: MatchOp::Regex,
                        value: "{namespace?}",
                    }],
                    filters: &[
                        "(?i)connection refused|no healthy upstream|upstream connect error|503 service unavailable|i/o timeout",
                    ],
                }),
            ),
        ],
    }
}

fn sync_failure() -> Playbook {
    Playbook {
        name: "sync-failure",
        description: "GitOps reconciliation: Flux controller logs and Ready conditions",
        kind: Some(AlertKind::SyncFailure),
        requires: &[],
        steps: vec![
            Step::new(
                "reconcile-logs",
                Expectation::ReconcileLogs,
                QueryTemplate::Logs(LogTemplate {
                    selector: &[LabelMatch {
                        role: LabelRole::Namespace,
                        op: MatchOp::Eq,
                        value: "flux-system",
                    }],
                    filters: &["(?i)reconcil|error|fail|stored artifact", r#""name":"{workload?}""#],
                }),
            )
            .stop_when(StopWhen::LatestLineContains {
                needles: RECONCILE_OK,
            }),
            Step::new(
                "reconcile-status",
                Expectation::ReconcileStatus,
                QueryTemplate::Metrics(
                    r#"gotk_reconcile_condition{type="Ready", status=~"True|False", name=~"{workload?}"} == 1"#,
                ),
            ),
        ],
    }
}

fn broad_then_narrow() -> Playbook {
    Playbook {
        name: "broad-then-narrow",
        description: "Generic sweep: stuck pods, node pressure, recent rollouts and scaling",
        kind: None,
        requires: &[],
        steps: vec![
            Step::new("pod-phase", Expectation::PodPhase, QueryTemplate::Metrics(POD_PHASE)),
            Step::new(
                "node-conditions",
                Expectation::NodeConditions,
                QueryTemplate::Metrics(NODE_CONDITIONS),
            ),
            Step::new(
                "workload-changes",
                Expectation::WorkloadChanges,
                QueryTemplate::Metrics(WORKLOAD_CHANGES),
            )
            .window(Duration::from_secs(3600)),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{LogEntry, MetricSample};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn range() -> TimeRange {
        TimeRange::ending_at(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            Duration::from_secs(900),
        )
    }

    fn full_target() -> Target {
        Target {
            namespace: Some("database".to_string()),
            workload: Some("pg".to_string()),
            pod: Some("pg-0".to_string()),
            node: Some("venus".to_string()),
        }
    }

    fn line(text: &str, minute: u32) -> LogEntry {
        LogEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 11, minute, 0).unwrap(),
            line: text.to_string(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fill_placeholders() {
        let query = fill(
            r#"increase(restarts{namespace="{namespace}", pod=~"{pod?}"}[{lookback}])"#,
            &Target {
                namespace: Some("database".to_string()),
                ..Target::default()
            },
            &range(),
        )
        .unwrap();
        assert_eq!(
            query,
            r#"increase(restarts{namespace="database", pod=~".+"}[15m])"#
        );
    }

    #[test]
    fn test_fill_missing_required_field() {
        let err = fill(r#"x{node="{node}"}"#, &Target::default(), &range()).unwrap_err();
        assert_eq!(err, TemplateError::MissingField(TargetField::Node));
    }

    #[test]
    fn test_fill_leaves_selectors_alone() {
        let query = fill(r#"{__name__="system.cpu.utilization", state="idle"}"#, &Target::default(), &range())
            .unwrap();
        assert_eq!(query, r#"{__name__="system.cpu.utilization", state="idle"}"#);
    }

    #[test]
    fn test_log_template_uses_label_schema() {
        let library = PlaybookLibrary::standard();
        let step = &library.iter().next().unwrap().steps[0];
        let query = step
            .resolve(Attempt::Primary, &full_target(), &LogLabels::default(), range())
            .unwrap()
            .unwrap();

        assert_eq!(query.source, Source::Logs);
        assert!(query
            .expression
            .starts_with(r#"{k8s_namespace_name="database", k8s_pod_name=~"pg-0"} |~ `(?i)oomkilled"#));
    }

    #[test]
    fn test_every_step_renders_for_full_target() {
        let library = PlaybookLibrary::standard();
        for playbook in library.iter() {
            for step in &playbook.steps {
                for attempt in [Attempt::Primary, Attempt::Alternate] {
                    let rendered = step
                        .resolve(attempt, &full_target(), &LogLabels::default(), range())
                        .unwrap();
                    if let Some(query) = rendered {
                        assert!(!query.expression.contains("{namespace"), "{}", step.name);
                        assert!(!query.expression.contains("{lookback}"), "{}", step.name);
                    }
                }
            }
        }
    }

    #[test]
    fn test_optional_placeholders_only_in_regex_matchers() {
        let library = PlaybookLibrary::standard();
        for playbook in library.iter() {
            for step in &playbook.steps {
                let rendered = step.query.render(&Target::default(), &LogLabels::default(), &range());
                if let Ok(expr) = rendered {
                    assert!(!expr.contains(r#"=".+""#), "{}: {expr}", step.name);
                }
            }
        }
    }

    #[test]
    fn test_selection() {
        let library = PlaybookLibrary::standard();

        let alert = Alert::new(AlertKind::CrashLoop, full_target(), "crash");
        let selection = library.select(&alert);
        assert_eq!(selection.playbook.name, "crash-loop");
        assert_eq!(selection.fallback, None);

        let alert = Alert::new(AlertKind::Unknown, full_target(), "?");
        let selection = library.select(&alert);
        assert_eq!(selection.playbook.name, "broad-then-narrow");
        assert_eq!(selection.fallback, Some(FallbackReason::UnknownKind));

        let alert = Alert::new(AlertKind::ResourceHigh, Target::default(), "cpu");
        let selection = library.select(&alert);
        assert_eq!(selection.playbook.name, "broad-then-narrow");
        assert_eq!(
            selection.fallback,
            Some(FallbackReason::MissingTarget(TargetField::Node))
        );
    }

    #[test]
    fn test_branch_predicates() {
        let library = PlaybookLibrary::standard();
        let crash = &library.iter().next().unwrap().steps[0];

        let empty = Evidence::Lines(vec![]);
        assert_eq!(crash.branch(&empty, Attempt::Primary), Decision::Degrade);
        assert_eq!(crash.branch(&empty, Attempt::Alternate), Decision::Continue);

        let oom = Evidence::Lines(vec![line("Last State: Terminated Reason: OOMKilled", 50)]);
        assert_eq!(crash.branch(&oom, Attempt::Primary), Decision::SkipRemaining);

        let panic = Evidence::Lines(vec![line("PANIC: could not write", 50)]);
        assert_eq!(crash.branch(&panic, Attempt::Primary), Decision::Continue);
    }

    #[test]
    fn test_latest_line_predicate() {
        let stop = StopWhen::LatestLineContains {
            needles: RECONCILE_OK,
        };
        let recovered = Evidence::Lines(vec![
            line(r#"{"level":"error","msg":"Reconciler error","name":"apps"}"#, 40),
            line(r#"{"level":"info","msg":"Reconciliation finished in 2s","name":"apps"}"#, 55),
        ]);
        assert!(stop.matches(&recovered));

        let failing = Evidence::Lines(vec![
            line(r#"{"level":"info","msg":"Reconciliation finished in 2s","name":"apps"}"#, 40),
            line(r#"{"level":"error","msg":"Reconciler error","name":"apps"}"#, 55),
        ]);
        assert!(!stop.matches(&failing));
    }

    #[test]
    fn test_label_equals_predicate() {
        let stop = StopWhen::LabelEquals {
            label: "reason",
            value: "OOMKilled",
        };
        let sample = MetricSample {
            labels: BTreeMap::from([("reason".to_string(), "OOMKilled".to_string())]),
            value: 1.0,
            timestamp: Utc::now(),
        };
        assert!(stop.matches(&Evidence::Samples(vec![sample.clone()])));
        assert!(!stop.matches(&Evidence::Samples(vec![MetricSample { value: 0.0, ..sample }])));
    }

    #[test]
    fn test_describe_lists_fallback_last() {
        let views = PlaybookLibrary::standard().describe(&LogLabels::default());
        assert_eq!(views.len(), 5);
        assert_eq!(views[4].name, "broad-then-narrow");
        assert!(views[1].steps[0].alternate.is_some());
    }
}
