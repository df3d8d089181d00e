//! Evidence source adapter.
//!
//! A uniform interface over the metrics backend (Prometheus-compatible,
//! VictoriaMetrics by default) and the log backend (Loki). Every query takes
//! an already-resolved expression and a bounded time range and returns an
//! ordered, possibly empty, set of records.
//!
//! An empty result is a valid answer ("no evidence"). Failing to ask is
//! always an [`EvidenceError`], never an empty result. The adapter performs
//! no retries; retry policy lives in the scheduler.

pub mod logs;
pub mod metrics;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use logs::{LogsClient, LogsConfig};
pub use metrics::{MetricsClient, MetricsConfig};

/// Which backend a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Metrics,
    Logs,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Window of `lookback` ending at `end`.
    #[must_use]
    pub fn ending_at(end: DateTime<Utc>, lookback: std::time::Duration) -> Self {
        let lookback =
            chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::minutes(15));
        Self {
            start: end - lookback,
            end,
        }
    }

    /// Window of `lookback` ending now.
    #[must_use]
    pub fn last(lookback: std::time::Duration) -> Self {
        Self::ending_at(Utc::now(), lookback)
    }

    #[must_use]
    pub fn span(&self) -> chrono::Duration {
        self.end - self.start
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Resolution step for range queries: roughly 60 points, never finer than 15s.
    #[must_use]
    pub fn step_secs(&self) -> i64 {
        (self.span().num_seconds() / 60).max(15)
    }

    /// The window as a PromQL duration literal (`15m`, `90s`, `2h`).
    #[must_use]
    pub fn promql_duration(&self) -> String {
        let secs = self.span().num_seconds().max(1);
        if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

/// One fully resolved query handed to an [`EvidenceSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceQuery {
    pub source: Source,
    pub expression: String,
    pub range: TimeRange,
}

/// A metric sample from the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Labels associated with this series
    pub labels: BTreeMap<String, String>,
    /// The sample value
    pub value: f64,
    /// Timestamp of the sample
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// First present label among `keys`.
    #[must_use]
    pub fn label(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.labels.get(*k))
            .map(String::as_str)
    }
}

/// A single log line from the log backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Timestamp of the log entry
    pub timestamp: DateTime<Utc>,
    /// The log line content
    pub line: String,
    /// Stream labels
    pub labels: BTreeMap<String, String>,
}

/// Result of one query, in the shape of its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Evidence {
    Samples(Vec<MetricSample>),
    Lines(Vec<LogEntry>),
}

impl Evidence {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Samples(s) => s.len(),
            Self::Lines(l) => l.len(),
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[MetricSample] {
        match self {
            Self::Samples(s) => s,
            Self::Lines(_) => &[],
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[LogEntry] {
        match self {
            Self::Lines(l) => l,
            Self::Samples(_) => &[],
        }
    }

    /// The newest sample of every series, ordered by series labels.
    #[must_use]
    pub fn latest_samples(&self) -> Vec<&MetricSample> {
        let mut latest: BTreeMap<&BTreeMap<String, String>, &MetricSample> = BTreeMap::new();
        for sample in self.samples() {
            latest
                .entry(&sample.labels)
                .and_modify(|cur| {
                    if sample.timestamp >= cur.timestamp {
                        *cur = sample;
                    }
                })
                .or_insert(sample);
        }
        latest.into_values().collect()
    }
}

/// Why a query could not be answered.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum EvidenceError {
    /// Backend could not be reached or answered with a server-side failure
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable { backend: Source, reason: String },

    /// The per-call timeout elapsed
    #[error("{backend} query timed out after {after_ms}ms")]
    Timeout { backend: Source, after_ms: u64 },

    /// The backend rejected the expression
    #[error("malformed {backend} query: {reason}")]
    MalformedQuery { backend: Source, reason: String },
}

impl EvidenceError {
    #[must_use]
    pub fn backend(&self) -> Source {
        match self {
            Self::Unavailable { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::MalformedQuery { backend, .. } => *backend,
        }
    }

    /// Whether asking again (with an alternate query) could help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedQuery { .. })
    }

    /// Short reason suitable for a report line.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Unavailable { reason, .. } | Self::MalformedQuery { reason, .. } => reason.clone(),
            Self::Timeout { after_ms, .. } => format!("timeout after {after_ms}ms"),
        }
    }
}

/// Map a transport-level failure.
pub(crate) fn transport_error(backend: Source, err: &reqwest::Error, timeout_secs: u64) -> EvidenceError {
    if err.is_timeout() {
        EvidenceError::Timeout {
            backend,
            after_ms: timeout_secs.saturating_mul(1000),
        }
    } else {
        EvidenceError::Unavailable {
            backend,
            reason: err.to_string(),
        }
    }
}

/// Map a non-success HTTP status. 400/422 mean the backend parsed and
/// rejected the expression; everything else means it could not answer.
pub(crate) fn status_error(backend: Source, status: reqwest::StatusCode, body: &str) -> EvidenceError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match status.as_u16() {
        400 | 422 => EvidenceError::MalformedQuery {
            backend,
            reason: detail,
        },
        _ => EvidenceError::Unavailable {
            backend,
            reason: format!("HTTP {status}: {detail}"),
        },
    }
}

/// Anything that can answer evidence queries.
///
/// Implementations must be safe for concurrent use by unrelated
/// investigations.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn query(&self, query: &EvidenceQuery) -> Result<Evidence, EvidenceError>;
}

/// Reachability of both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub metrics: bool,
    pub logs: bool,
}

impl BackendHealth {
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.metrics && self.logs
    }
}

/// The production adapter: VictoriaMetrics for metrics, Loki for logs.
#[derive(Debug, Clone)]
pub struct ClusterEvidence {
    metrics: MetricsClient,
    logs: LogsClient,
}

impl ClusterEvidence {
    #[must_use]
    pub fn new(metrics: MetricsClient, logs: LogsClient) -> Self {
        Self { metrics, logs }
    }

    /// Create both clients from configuration.
    pub fn from_config(metrics: MetricsConfig, logs: LogsConfig) -> anyhow::Result<Self> {
        Ok(Self::new(MetricsClient::new(metrics)?, LogsClient::new(logs)?))
    }

    /// Probe both backends concurrently.
    pub async fn health(&self) -> BackendHealth {
        let (metrics, logs) = tokio::join!(self.metrics.health_check(), self.logs.health_check());
        BackendHealth { metrics, logs }
    }
}

#[async_trait]
impl EvidenceSource for ClusterEvidence {
    async fn query(&self, query: &EvidenceQuery) -> Result<Evidence, EvidenceError> {
        match query.source {
            Source::Metrics => self
                .metrics
                .query_range(&query.expression, &query.range)
                .await
                .map(Evidence::Samples),
            Source::Logs => self
                .logs
                .query_range(&query.expression, &query.range, 0)
                .await
                .map(Evidence::Lines),
        }
    }
}
