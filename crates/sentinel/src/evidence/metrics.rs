//! Metrics backend client (Prometheus HTTP API, VictoriaMetrics by default).
//!
//! Only range queries are issued: every playbook step asks about a window,
//! never a single instant.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{status_error, transport_error, EvidenceError, MetricSample, Source, TimeRange};

/// Default VictoriaMetrics service URL (internal Kubernetes DNS)
const DEFAULT_METRICS_URL: &str =
    "http://victoria-metrics-single-server.monitoring.svc.cluster.home:8428";

/// Configuration for the metrics client
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Base URL for the Prometheus-compatible API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Path probed by the health check
    pub health_path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("VICTORIA_METRICS_URL")
                .unwrap_or_else(|_| DEFAULT_METRICS_URL.to_string()),
            timeout_secs: 5,
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: Option<(f64, String)>,
    values: Option<Vec<(f64, String)>>,
}

/// Client for the metrics backend
#[derive(Debug, Clone)]
pub struct MetricsClient {
    config: MetricsConfig,
    client: reqwest::Client,
}

impl MetricsClient {
    /// Create a new metrics client with the given configuration.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Create a new client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(MetricsConfig::default())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Execute a range query over `range`.
    ///
    /// Samples are returned series by series, each series oldest first.
    /// Non-finite values (`NaN`, `+Inf`) are dropped.
    pub async fn query_range(
        &self,
        query: &str,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>, EvidenceError> {
        let url = format!(
            "{}/api/v1/query_range",
            self.config.base_url.trim_end_matches('/')
        );
        let step = format!("{}s", range.step_secs());

        debug!(
            query = %query,
            start = %range.start,
            end = %range.end,
            step = %step,
            "Executing metrics range query"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", &range.start.timestamp().to_string()),
                ("end", &range.end.timestamp().to_string()),
                ("step", &step),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Source::Metrics, &e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Source::Metrics, status, &body));
        }

        let parsed: QueryResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(Source::Metrics, &e, self.config.timeout_secs)
            } else {
                EvidenceError::Unavailable {
                    backend: Source::Metrics,
                    reason: format!("invalid response body: {e}"),
                }
            }
        })?;

        if parsed.status != "success" {
            let reason = parsed
                .error
                .unwrap_or_else(|| format!("status {}", parsed.status));
            return Err(match parsed.error_type.as_deref() {
                Some("bad_data") => EvidenceError::MalformedQuery {
                    backend: Source::Metrics,
                    reason,
                },
                _ => EvidenceError::Unavailable {
                    backend: Source::Metrics,
                    reason,
                },
            });
        }

        let results = parsed.data.map(|d| d.result).unwrap_or_default();
        let samples = parse_results(results);
        debug!(samples = samples.len(), "Retrieved metric samples");
        Ok(samples)
    }

    /// Check if the metrics backend is reachable.
    pub async fn health_check(&self) -> bool {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.health_path
        );

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Metrics health check failed");
                false
            }
        }
    }
}

fn parse_results(results: Vec<QueryResult>) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    for result in results {
        let points = match (result.values, result.value) {
            (Some(values), _) => values,
            (None, Some(value)) => vec![value],
            (None, None) => continue,
        };
        for (ts, raw) in points {
            let Ok(value) = raw.parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let secs = ts.trunc() as i64;
            let nanos = (ts.fract() * 1e9) as u32;
            if let Some(timestamp) = DateTime::from_timestamp(secs, nanos) {
                samples.push(MetricSample {
                    labels: result.metric.clone(),
                    value,
                    timestamp,
                });
            }
        }
    }
    samples
}
