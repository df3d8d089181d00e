//! Alert intake.
//!
//! An [`Alert`] is the immutable event that starts one investigation. It
//! arrives either as a structured [`AlertIntake`] (HTTP or CLI) or inside an
//! Alertmanager webhook payload.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::warn;
use uuid::Uuid;

/// Kubernetes object names: lowercase alphanumerics, `-` and `.`.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9.\-]{0,251}[a-z0-9])?$").unwrap());

/// What the external detector thinks is wrong.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum AlertKind {
    CrashLoop,
    ResourceHigh,
    ServiceUnreachable,
    SyncFailure,
    #[default]
    Unknown,
}

impl AlertKind {
    pub const ALL: [Self; 5] = [
        Self::CrashLoop,
        Self::ResourceHigh,
        Self::ServiceUnreachable,
        Self::SyncFailure,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CrashLoop => "crash_loop",
            Self::ResourceHigh => "resource_high",
            Self::ServiceUnreachable => "service_unreachable",
            Self::SyncFailure => "sync_failure",
            Self::Unknown => "unknown",
        }
    }

    /// Derive a kind from an Alertmanager `alertname` by keyword.
    #[must_use]
    pub fn from_alert_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["crashloop", "oom"]) {
            Self::CrashLoop
        } else if has(&["flux", "reconcil", "sync", "kustomization", "helmrelease"]) {
            Self::SyncFailure
        } else if has(&["cpu", "memory", "disk", "load", "pressure"]) {
            Self::ResourceHigh
        } else if has(&["unreachable", "down", "endpoint", "probe", "unhealthy"]) {
            Self::ServiceUnreachable
        } else {
            Self::Unknown
        }
    }
}

impl From<String> for AlertKind {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl FromStr for AlertKind {
    type Err = Infallible;

    /// Accepts `crash_loop`, `crash-loop`, `CrashLoop` and similar spellings.
    /// Anything unrecognised is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(match normalized.as_str() {
            "crashloop" => Self::CrashLoop,
            "resourcehigh" => Self::ResourceHigh,
            "serviceunreachable" => Self::ServiceUnreachable,
            "syncfailure" => Self::SyncFailure,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CrashLoop => "CrashLoop",
            Self::ResourceHigh => "ResourceHigh",
            Self::ServiceUnreachable => "ServiceUnreachable",
            Self::SyncFailure => "SyncFailure",
            Self::Unknown => "Unknown",
        })
    }
}

/// A target field a query template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetField {
    Namespace,
    Workload,
    Pod,
    Node,
}

impl TargetField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Workload => "workload",
            Self::Pod => "pod",
            Self::Node => "node",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "namespace" => Some(Self::Namespace),
            "workload" => Some(Self::Workload),
            "pod" => Some(Self::Pod),
            "node" => Some(Self::Node),
            _ => None,
        }
    }
}

/// Where the alert points. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl Target {
    /// Drop empty values and anything that is not a valid object name.
    ///
    /// Values end up inside query expressions, so only identifier characters
    /// are accepted.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            namespace: clean(TargetField::Namespace, self.namespace),
            workload: clean(TargetField::Workload, self.workload),
            pod: clean(TargetField::Pod, self.pod),
            node: clean(TargetField::Node, self.node),
        }
    }

    #[must_use]
    pub fn get(&self, field: TargetField) -> Option<&str> {
        match field {
            TargetField::Namespace => self.namespace.as_deref(),
            TargetField::Workload => self.workload.as_deref(),
            TargetField::Pod => self.pod.as_deref(),
            TargetField::Node => self.node.as_deref(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.workload.is_none() && self.pod.is_none() && self.node.is_none()
    }

    /// Short human label: `namespace/pod`, `namespace/workload`, `node`, ...
    #[must_use]
    pub fn subject(&self) -> String {
        let object = self.pod.as_deref().or(self.workload.as_deref());
        match (self.namespace.as_deref(), object, self.node.as_deref()) {
            (Some(ns), Some(obj), _) => format!("{ns}/{obj}"),
            (None, Some(obj), _) => obj.to_string(),
            (Some(ns), None, _) => ns.to_string(),
            (None, None, Some(node)) => node.to_string(),
            (None, None, None) => "cluster".to_string(),
        }
    }
}

fn clean(field: TargetField, value: Option<String>) -> Option<String> {
    let value = value?.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    if IDENTIFIER.is_match(&value) {
        Some(value)
    } else {
        warn!(field = field.as_str(), value = %value, "Ignoring invalid target identifier");
        None
    }
}

/// The triggering event of one investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub target: Target,
    pub description: String,
    pub received_at: DateTime<Utc>,
}

impl Alert {
    #[must_use]
    pub fn new(kind: AlertKind, target: Target, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.sanitized(),
            description: description.into(),
            received_at: Utc::now(),
        }
    }
}

/// Structured intake as accepted over HTTP and from the CLI.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertIntake {
    pub kind: AlertKind,
    pub namespace: Option<String>,
    pub workload: Option<String>,
    pub pod: Option<String>,
    pub node: Option<String>,
    pub description: Option<String>,
}

impl AlertIntake {
    #[must_use]
    pub fn into_alert(self) -> Alert {
        let description = self
            .description
            .unwrap_or_else(|| format!("{} alert", self.kind));
        Alert::new(
            self.kind,
            Target {
                namespace: self.namespace,
                workload: self.workload,
                pod: self.pod,
                node: self.node,
            },
            description,
        )
    }
}

/// Alertmanager webhook payload.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    /// Version of the payload format
    #[serde(default)]
    pub version: String,
    /// Unique identifier for this group of alerts
    #[serde(default)]
    pub group_key: String,
    /// Status: "firing" or "resolved"
    #[serde(default)]
    pub status: String,
    /// Receiver that matched this alert
    #[serde(default)]
    pub receiver: String,
    /// Labels common to all alerts
    #[serde(default)]
    pub common_labels: HashMap<String, String>,
    /// List of alerts in this notification
    #[serde(default)]
    pub alerts: Vec<AlertmanagerAlert>,
}

impl AlertmanagerPayload {
    /// Firing alerts converted to investigation inputs. Resolved ones are skipped.
    #[must_use]
    pub fn firing_alerts(&self) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| a.is_firing())
            .map(AlertmanagerAlert::to_alert)
            .collect()
    }
}

/// Individual alert from Alertmanager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Status: "firing" or "resolved"
    pub status: String,
    /// Alert labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Alert annotations
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the alert started firing
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Unique fingerprint for this alert
    #[serde(default)]
    pub fingerprint: String,
}

impl AlertmanagerAlert {
    /// Get the alert name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map_or("unknown", String::as_str)
    }

    /// Check if this is a firing alert.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == "firing"
    }

    fn label(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.labels.get(*k)).cloned()
    }

    #[must_use]
    pub fn to_alert(&self) -> Alert {
        let target = Target {
            namespace: self.label(&["namespace", "k8s_namespace_name"]),
            workload: self.label(&["deployment", "workload", "statefulset", "daemonset"]),
            pod: self.label(&["pod", "k8s_pod_name"]),
            node: self.label(&["node", "k8s_node_name"]),
        };
        let description = self
            .annotations
            .get("description")
            .or_else(|| self.annotations.get("summary"))
            .cloned()
            .unwrap_or_else(|| self.name().to_string());

        let mut alert = Alert::new(AlertKind::from_alert_name(self.name()), target, description);
        if let Some(starts_at) = self.starts_at {
            alert.received_at = starts_at;
        }
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_alert_name() {
        assert_eq!(AlertKind::from_alert_name("KubePodCrashLooping"), AlertKind::CrashLoop);
        assert_eq!(AlertKind::from_alert_name("ContainerOOMKilled"), AlertKind::CrashLoop);
        assert_eq!(AlertKind::from_alert_name("NodeHighCPU"), AlertKind::ResourceHigh);
        assert_eq!(AlertKind::from_alert_name("NodeMemoryPressure"), AlertKind::ResourceHigh);
        assert_eq!(AlertKind::from_alert_name("TargetDown"), AlertKind::ServiceUnreachable);
        assert_eq!(
            AlertKind::from_alert_name("FluxReconciliationFailure"),
            AlertKind::SyncFailure
        );
        assert_eq!(AlertKind::from_alert_name("Watchdog"), AlertKind::Unknown);
    }

    #[test]
    fn test_kind_parsing_is_lenient() {
        assert_eq!("crash-loop".parse::<AlertKind>(), Ok(AlertKind::CrashLoop));
        assert_eq!("ResourceHigh".parse::<AlertKind>(), Ok(AlertKind::ResourceHigh));
        assert_eq!("bogus".parse::<AlertKind>(), Ok(AlertKind::Unknown));

        let kind: AlertKind = serde_json::from_str("\"sync_failure\"").unwrap();
        assert_eq!(kind, AlertKind::SyncFailure);
        let kind: AlertKind = serde_json::from_str("\"Meteor\"").unwrap();
        assert_eq!(kind, AlertKind::Unknown);
        assert_eq!(serde_json::to_string(&AlertKind::CrashLoop).unwrap(), "\"crash_loop\"");
    }

    #[test]
    fn test_target_sanitizing() {
        let target = Target {
            namespace: Some("Database".to_string()),
            workload: Some(String::new()),
            pod: Some("x\"} or vector(1)".to_string()),
            node: Some(" mercury-server ".to_string()),
        }
        .sanitized();

        assert_eq!(target.namespace.as_deref(), Some("database"));
        assert_eq!(target.workload, None);
        assert_eq!(target.pod, None);
        assert_eq!(target.node.as_deref(), Some("mercury-server"));
    }

    #[test]
    fn test_intake_tolerates_missing_fields() {
        let intake: AlertIntake = serde_json::from_str(r#"{"pod": "", "namespace": "database"}"#).unwrap();
        let alert = intake.into_alert();
        assert_eq!(alert.kind, AlertKind::Unknown);
        assert_eq!(alert.target.pod, None);
        assert_eq!(alert.target.subject(), "database");
    }

    #[test]
    fn test_alertmanager_payload_conversion() {
        let payload: AlertmanagerPayload = serde_json::from_str(
            r#"{
                "version": "4",
                "groupKey": "{}:{alertname=\"KubePodCrashLooping\"}",
                "status": "firing",
                "receiver": "sentinel",
                "alerts": [
                    {
                        "status": "firing",
                        "labels": {"alertname": "KubePodCrashLooping", "namespace": "database", "pod": "pg-0"},
                        "annotations": {"description": "pg-0 restarting"},
                        "startsAt": "2026-03-01T12:00:00Z"
                    },
                    {
                        "status": "resolved",
                        "labels": {"alertname": "NodeHighCPU", "node": "venus"},
                        "annotations": {}
                    }
                ]
            }"#,
        )
        .unwrap();

        let alerts = payload.firing_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CrashLoop);
        assert_eq!(alerts[0].target.subject(), "database/pg-0");
        assert_eq!(alerts[0].description, "pg-0 restarting");
    }
}
