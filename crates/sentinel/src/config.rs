//! Runtime configuration.
//!
//! Read once at startup: optional JSON file, then environment overrides.
//! Topology and thresholds are immutable for the life of the process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::evidence::{LogsConfig, MetricsConfig};
use crate::scheduler::MAX_EVIDENCE_CALLS;

const DEFAULT_METRICS_URL: &str =
    "http://victoria-metrics-single-server.monitoring.svc.cluster.home:8428";
const DEFAULT_LOGS_URL: &str = "http://loki.monitoring.svc.cluster.home:3100";

/// Label names used by the log pipeline for stream selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLabels {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl Default for LogLabels {
    fn default() -> Self {
        Self {
            namespace: "k8s_namespace_name".to_string(),
            pod: "k8s_pod_name".to_string(),
            container: "k8s_container_name".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: NodeRole,
}

/// Known cluster nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
}

impl Default for Topology {
    fn default() -> Self {
        let node = |name: &str, role| NodeSpec {
            name: name.to_string(),
            role,
        };
        Self {
            nodes: vec![
                node("mercury-server", NodeRole::ControlPlane),
                node("venus", NodeRole::Worker),
                node("mars", NodeRole::Worker),
                node("earth", NodeRole::Worker),
            ],
        }
    }
}

impl Topology {
    /// Role of `node`; nodes not listed are treated as workers.
    #[must_use]
    pub fn role_of(&self, node: &str) -> NodeRole {
        self.nodes
            .iter()
            .find(|n| n.name == node)
            .map_or(NodeRole::Worker, |n| n.role)
    }
}

/// Utilization ratios (0..1) at or above which a node is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub control_plane: f64,
    pub worker: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            control_plane: 0.70,
            worker: 0.85,
        }
    }
}

impl Thresholds {
    #[must_use]
    pub fn for_role(&self, role: NodeRole) -> f64 {
        match role {
            NodeRole::ControlPlane => self.control_plane,
            NodeRole::Worker => self.worker,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Prometheus-compatible metrics API
    pub metrics_url: String,
    /// Loki API
    pub logs_url: String,
    /// Per EvidenceCall timeout
    pub call_timeout_secs: u64,
    /// Default query window
    pub lookback_mins: u64,
    /// EvidenceCalls allowed per investigation (never above 5)
    pub budget: usize,
    /// Maximum log lines fetched per query
    pub log_limit: u32,
    pub log_labels: LogLabels,
    pub topology: Topology,
    pub thresholds: Thresholds,
    /// Restarts within the lookback that count as crash looping
    pub restart_threshold: f64,
    /// Evidence lines in a rendered report
    pub max_evidence_lines: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            metrics_url: DEFAULT_METRICS_URL.to_string(),
            logs_url: DEFAULT_LOGS_URL.to_string(),
            call_timeout_secs: 5,
            lookback_mins: 15,
            budget: MAX_EVIDENCE_CALLS,
            log_limit: 200,
            log_labels: LogLabels::default(),
            topology: Topology::default(),
            thresholds: Thresholds::default(),
            restart_threshold: 3.0,
            max_evidence_lines: 6,
        }
    }
}

impl SentinelConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config.validated())
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VICTORIA_METRICS_URL").filter(|v| !v.is_empty()) {
            self.metrics_url = url;
        }
        if let Some(url) = lookup("LOKI_URL").filter(|v| !v.is_empty()) {
            self.logs_url = url;
        }
        if let Some(secs) = lookup("SENTINEL_CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = secs
                .parse()
                .context("SENTINEL_CALL_TIMEOUT_SECS must be an integer")?;
        }
        if let Some(mins) = lookup("SENTINEL_LOOKBACK_MINS") {
            self.lookback_mins = mins
                .parse()
                .context("SENTINEL_LOOKBACK_MINS must be an integer")?;
        }
        Ok(self)
    }

    /// Clamp values into their legal ranges.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.budget > MAX_EVIDENCE_CALLS || self.budget == 0 {
            warn!(
                configured = self.budget,
                ceiling = MAX_EVIDENCE_CALLS,
                "Evidence budget out of range, clamping"
            );
            self.budget = self.budget.clamp(1, MAX_EVIDENCE_CALLS);
        }
        self.call_timeout_secs = self.call_timeout_secs.max(1);
        self.lookback_mins = self.lookback_mins.max(1);
        self.max_evidence_lines = self.max_evidence_lines.clamp(1, 7);
        debug!(
            metrics_url = %self.metrics_url,
            logs_url = %self.logs_url,
            budget = self.budget,
            "Configuration loaded"
        );
        self
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    #[must_use]
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_mins * 60)
    }

    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            base_url: self.metrics_url.clone(),
            timeout_secs: self.call_timeout_secs,
            health_path: "/health".to_string(),
        }
    }

    #[must_use]
    pub fn logs_config(&self) -> LogsConfig {
        LogsConfig {
            base_url: self.logs_url.clone(),
            timeout_secs: self.call_timeout_secs,
            default_limit: self.log_limit,
        }
    }
}
