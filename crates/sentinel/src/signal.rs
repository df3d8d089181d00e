//! Typed observations derived from evidence.
//!
//! A [`SignalSet`] holds at most one value per [`SignalKey`]; a later
//! observation for the same key replaces the earlier one. Keys are ordered
//! by importance, so iterating a set yields the most significant signals
//! first.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::evidence::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
    Pid,
}

impl Resource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Pid => "pid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Rollout,
    Scale,
}

/// Signal kinds without their subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SignalKind {
    ServiceOutage,
    DataLossRisk,
    #[serde(rename = "OOMKilled")]
    OomKilled,
    NodeSaturated,
    NodePressure,
    PodCrashLooping,
    ReconciliationFailed,
    Resolved,
    PodStuck,
    RecentChange,
    UpstreamErrors,
    EvidenceUnavailable,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceOutage => "ServiceOutage",
            Self::DataLossRisk => "DataLossRisk",
            Self::OomKilled => "OOMKilled",
            Self::NodeSaturated => "NodeSaturated",
            Self::NodePressure => "NodePressure",
            Self::PodCrashLooping => "PodCrashLooping",
            Self::ReconciliationFailed => "ReconciliationFailed",
            Self::Resolved => "Resolved",
            Self::PodStuck => "PodStuck",
            Self::RecentChange => "RecentChange",
            Self::UpstreamErrors => "UpstreamErrors",
            Self::EvidenceUnavailable => "EvidenceUnavailable",
        }
    }

    /// Conditions that warrant a warning unless a matching `Resolved` exists.
    #[must_use]
    pub const fn is_warning_class(self) -> bool {
        matches!(
            self,
            Self::OomKilled
                | Self::NodeSaturated
                | Self::NodePressure
                | Self::PodCrashLooping
                | Self::ReconciliationFailed
        )
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a signal. Variant order is importance order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalKey {
    ServiceOutage { service: String },
    DataLossRisk { namespace: String },
    OomKilled { pod: String },
    NodeSaturated { node: String, resource: Resource },
    /// A kubelet pressure condition. Kept apart from `NodeSaturated` so a
    /// utilization sample below threshold cannot clear it.
    NodePressure { node: String, resource: Resource },
    PodCrashLooping { pod: String },
    ReconciliationFailed { object: String },
    Resolved { condition: SignalKind, subject: String },
    PodStuck { pod: String, phase: String },
    RecentChange { workload: String, change: ChangeKind },
    UpstreamErrors { namespace: String },
    EvidenceUnavailable { source: Source, reason: String },
}

impl SignalKey {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::ServiceOutage { .. } => SignalKind::ServiceOutage,
            Self::DataLossRisk { .. } => SignalKind::DataLossRisk,
            Self::OomKilled { .. } => SignalKind::OomKilled,
            Self::NodeSaturated { .. } => SignalKind::NodeSaturated,
            Self::NodePressure { .. } => SignalKind::NodePressure,
            Self::PodCrashLooping { .. } => SignalKind::PodCrashLooping,
            Self::ReconciliationFailed { .. } => SignalKind::ReconciliationFailed,
            Self::Resolved { .. } => SignalKind::Resolved,
            Self::PodStuck { .. } => SignalKind::PodStuck,
            Self::RecentChange { .. } => SignalKind::RecentChange,
            Self::UpstreamErrors { .. } => SignalKind::UpstreamErrors,
            Self::EvidenceUnavailable { .. } => SignalKind::EvidenceUnavailable,
        }
    }

    /// What the signal is about. A `Resolved` clears the warning-class signal
    /// whose kind and subject both match.
    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            Self::ServiceOutage { service } => service.clone(),
            Self::DataLossRisk { namespace } | Self::UpstreamErrors { namespace } => namespace.clone(),
            Self::OomKilled { pod } | Self::PodCrashLooping { pod } | Self::PodStuck { pod, .. } => {
                pod.clone()
            }
            Self::NodeSaturated { node, resource } | Self::NodePressure { node, resource } => {
                format!("{node}/{}", resource.as_str())
            }
            Self::ReconciliationFailed { object } => object.clone(),
            Self::Resolved { subject, .. } => subject.clone(),
            Self::RecentChange { workload, .. } => workload.clone(),
            Self::EvidenceUnavailable { source, .. } => source.to_string(),
        }
    }

    /// The `Resolved` key that would cancel this signal.
    #[must_use]
    pub fn resolution(&self) -> SignalKey {
        SignalKey::Resolved {
            condition: self.kind(),
            subject: self.subject(),
        }
    }

    fn fmt_params(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceOutage { service } => write!(f, "service={service}"),
            Self::DataLossRisk { namespace } | Self::UpstreamErrors { namespace } => {
                write!(f, "namespace={namespace}")
            }
            Self::OomKilled { pod } | Self::PodCrashLooping { pod } => write!(f, "pod={pod}"),
            Self::NodeSaturated { node, resource } | Self::NodePressure { node, resource } => {
                write!(f, "node={node}, resource={}", resource.as_str())
            }
            Self::ReconciliationFailed { object } => write!(f, "object={object}"),
            Self::Resolved { condition, subject } => write!(f, "{condition}, {subject}"),
            Self::PodStuck { pod, phase } => write!(f, "pod={pod}, phase={phase}"),
            Self::RecentChange { workload, change } => {
                let change = match change {
                    ChangeKind::Rollout => "rollout",
                    ChangeKind::Scale => "scale",
                };
                write!(f, "workload={workload}, change={change}")
            }
            Self::EvidenceUnavailable { source, reason } => write!(f, "{source}, {reason}"),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind())?;
        self.fmt_params(f)?;
        f.write_str(")")
    }
}

/// Boolean or graded observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    Flag(bool),
    Graded(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Graded(v) if v.fract() == 0.0 && v.abs() < 1e12 => write!(f, "{v:.0}"),
            Self::Graded(v) => write!(f, "{v:.2}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    #[serde(flatten)]
    pub key: SignalKey,
    pub value: SignalValue,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Accumulated signals of one investigation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSet {
    entries: BTreeMap<SignalKey, SignalValue>,
}

impl SignalSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation, replacing any earlier one for the same key.
    pub fn insert(&mut self, key: SignalKey, value: SignalValue) {
        self.entries.insert(key, value);
    }

    pub fn flag(&mut self, key: SignalKey) {
        self.insert(key, SignalValue::Flag(true));
    }

    pub fn graded(&mut self, key: SignalKey, value: f64) {
        self.insert(key, SignalValue::Graded(value));
    }

    /// Fold `other` into this set; its values win.
    pub fn merge(&mut self, other: SignalSet) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn get(&self, key: &SignalKey) -> Option<SignalValue> {
        self.entries.get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &SignalKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SignalKey, &SignalValue)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn has_kind(&self, kind: SignalKind) -> bool {
        self.entries.keys().any(|k| k.kind() == kind)
    }

    /// Whether anything beyond "could not ask" was observed.
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        self.entries
            .keys()
            .any(|k| k.kind() != SignalKind::EvidenceUnavailable)
    }

    /// Warning-class signals with no matching `Resolved`.
    pub fn active_warnings(&self) -> impl Iterator<Item = &SignalKey> {
        self.entries
            .keys()
            .filter(|k| k.kind().is_warning_class() && !self.contains(&k.resolution()))
    }

    /// Signals in importance order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Signal> {
        self.entries
            .iter()
            .map(|(key, value)| Signal {
                key: key.clone(),
                value: *value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let oom = Signal {
            key: SignalKey::OomKilled { pod: "x".to_string() },
            value: SignalValue::Flag(true),
        };
        assert_eq!(oom.to_string(), "OOMKilled(pod=x)=true");

        let cpu = Signal {
            key: SignalKey::NodeSaturated {
                node: "mercury-server".to_string(),
                resource: Resource::Cpu,
            },
            value: SignalValue::Graded(0.97),
        };
        assert_eq!(
            cpu.to_string(),
            "NodeSaturated(node=mercury-server, resource=cpu)=0.97"
        );

        let restarts = SignalValue::Graded(7.0);
        assert_eq!(restarts.to_string(), "7");
    }

    #[test]
    fn test_latest_observation_wins() {
        let key = SignalKey::UpstreamErrors {
            namespace: "ingress".to_string(),
        };
        let mut set = SignalSet::new();
        set.graded(key.clone(), 4.0);
        set.graded(key.clone(), 9.0);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&key), Some(SignalValue::Graded(9.0)));
    }

    #[test]
    fn test_importance_order() {
        let mut set = SignalSet::new();
        set.flag(SignalKey::EvidenceUnavailable {
            source: Source::Logs,
            reason: "down".to_string(),
        });
        set.flag(SignalKey::OomKilled { pod: "a".to_string() });
        set.flag(SignalKey::ServiceOutage {
            service: "api".to_string(),
        });

        let kinds: Vec<_> = set.keys().map(SignalKey::kind).collect();
        assert_eq!(
            kinds,
            vec![
                SignalKind::ServiceOutage,
                SignalKind::OomKilled,
                SignalKind::EvidenceUnavailable
            ]
        );
    }

    #[test]
    fn test_resolution_matches_kind_and_subject() {
        let mut set = SignalSet::new();
        let cpu = SignalKey::NodeSaturated {
            node: "venus".to_string(),
            resource: Resource::Cpu,
        };
        let memory = SignalKey::NodeSaturated {
            node: "venus".to_string(),
            resource: Resource::Memory,
        };
        set.graded(cpu.clone(), 0.91);
        set.flag(memory.resolution());

        let active: Vec<_> = set.active_warnings().collect();
        assert_eq!(active, vec![&cpu]);

        set.flag(cpu.resolution());
        assert_eq!(set.active_warnings().count(), 0);
    }

    #[test]
    fn test_utilization_resolution_leaves_pressure_active() {
        let pressure = SignalKey::NodePressure {
            node: "venus".to_string(),
            resource: Resource::Memory,
        };
        let utilization = SignalKey::NodeSaturated {
            node: "venus".to_string(),
            resource: Resource::Memory,
        };
        let mut set = SignalSet::new();
        set.flag(pressure.clone());
        set.graded(utilization.resolution(), 0.5);

        assert_ne!(pressure.resolution(), utilization.resolution());
        let active: Vec<_> = set.active_warnings().collect();
        assert_eq!(active, vec![&pressure]);
    }

    #[test]
    fn test_unavailable_only_is_not_conclusive() {
        let mut set = SignalSet::new();
        assert!(!set.is_conclusive());
        set.flag(SignalKey::EvidenceUnavailable {
            source: Source::Metrics,
            reason: "timeout".to_string(),
        });
        assert!(!set.is_conclusive());
        set.flag(SignalKey::PodStuck {
            pod: "p".to_string(),
            phase: "Pending".to_string(),
        });
        assert!(set.is_conclusive());
    }
}
