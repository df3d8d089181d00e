//! Loki client for querying container logs.
//!
//! Queries run backwards from the end of the window so the newest lines
//! survive the entry limit; results are re-sorted oldest first.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{status_error, transport_error, EvidenceError, LogEntry, Source, TimeRange};

/// Default Loki service URL (internal Kubernetes DNS)
const DEFAULT_LOKI_URL: &str = "http://loki.monitoring.svc.cluster.home:3100";

/// Configuration for the Loki client
#[derive(Debug, Clone)]
pub struct LogsConfig {
    /// Base URL for the Loki API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of log entries to return per query
    pub default_limit: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("LOKI_URL").unwrap_or_else(|_| DEFAULT_LOKI_URL.to_string()),
            timeout_secs: 5,
            default_limit: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    #[serde(default)]
    data: Option<LokiData>,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    #[serde(default)]
    stream: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(String, String)>, // (timestamp_ns, line)
}

/// Client for querying Grafana Loki
#[derive(Debug, Clone)]
pub struct LogsClient {
    config: LogsConfig,
    client: reqwest::Client,
}

impl LogsClient {
    /// Create a new Loki client with the given configuration
    pub fn new(config: LogsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Create a new Loki client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(LogsConfig::default())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Execute a `LogQL` query over `range`.
    ///
    /// `limit` of 0 uses the configured default. Entries come back sorted by
    /// timestamp, oldest first.
    pub async fn query_range(
        &self,
        query: &str,
        range: &TimeRange,
        limit: u32,
    ) -> Result<Vec<LogEntry>, EvidenceError> {
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };

        let start_ns = range.start.timestamp_nanos_opt().unwrap_or(0);
        let end_ns = range.end.timestamp_nanos_opt().unwrap_or(0);

        let url = format!(
            "{}/loki/api/v1/query_range",
            self.config.base_url.trim_end_matches('/')
        );

        debug!(
            query = %query,
            start = %range.start,
            end = %range.end,
            limit = %limit,
            "Querying Loki"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", &start_ns.to_string()),
                ("end", &end_ns.to_string()),
                ("limit", &limit.to_string()),
                ("direction", "backward"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Source::Logs, &e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Source::Logs, status, &body));
        }

        let parsed: LokiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(Source::Logs, &e, self.config.timeout_secs)
            } else {
                EvidenceError::Unavailable {
                    backend: Source::Logs,
                    reason: format!("invalid response body: {e}"),
                }
            }
        })?;

        if parsed.status != "success" {
            return Err(EvidenceError::Unavailable {
                backend: Source::Logs,
                reason: format!("Loki query returned status: {}", parsed.status),
            });
        }

        let mut entries = Vec::new();
        for stream in parsed.data.map(|d| d.result).unwrap_or_default() {
            for (timestamp_ns, line) in stream.values {
                let Ok(ns) = timestamp_ns.parse::<i64>() else {
                    continue;
                };
                let secs = ns.div_euclid(1_000_000_000);
                let nsecs = ns.rem_euclid(1_000_000_000) as u32;
                if let Some(timestamp) = DateTime::from_timestamp(secs, nsecs) {
                    entries.push(LogEntry {
                        timestamp,
                        line,
                        labels: stream.stream.clone(),
                    });
                }
            }
        }

        entries.sort_by_key(|e| e.timestamp);

        debug!(entries = entries.len(), "Retrieved log entries from Loki");
        Ok(entries)
    }

    /// Check if Loki is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/ready", self.config.base_url.trim_end_matches('/'));

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Loki health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loki_config_default() {
        let config = LogsConfig::default();
        assert!(!config.base_url.is_empty());
        assert_eq!(config.default_limit, 200);
    }

    #[test]
    fn test_stream_parsing() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "streams",
                "result": [{
                    "stream": {"k8s_namespace_name": "database", "k8s_pod_name": "pg-0"},
                    "values": [["1772366460000000000", "FATAL: terminating"], ["1772366400000000000", "starting"]]
                }]
            }
        }"#;
        let parsed: LokiResponse = serde_json::from_str(body).unwrap();
        let streams = parsed.data.unwrap().result;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].values.len(), 2);
        assert_eq!(streams[0].stream["k8s_pod_name"], "pg-0");
    }
}
