//! HTTP backends against mock servers.

use std::time::Duration;

use sentinel::evidence::{
    ClusterEvidence, Evidence, EvidenceError, EvidenceQuery, EvidenceSource, LogsClient,
    LogsConfig, MetricsClient, MetricsConfig, Source, TimeRange,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn metrics(server: &MockServer) -> MetricsClient {
    MetricsClient::new(MetricsConfig {
        base_url: server.uri(),
        ..MetricsConfig::default()
    })
    .unwrap()
}

fn logs(server: &MockServer) -> LogsClient {
    LogsClient::new(LogsConfig {
        base_url: server.uri(),
        ..LogsConfig::default()
    })
    .unwrap()
}

fn window() -> TimeRange {
    TimeRange::last(Duration::from_secs(900))
}

#[tokio::test]
async fn test_metrics_range_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .and(query_param("query", "up"))
        .and(query_param("step", "15s"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"k8s_node_name": "mars"},
                    "values": [[1772366400, "0.5"], [1772366415, "0.75"]]
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let samples = metrics(&server).query_range("up", &window()).await.unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].labels["k8s_node_name"], "mars");
    assert!((samples[1].value - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_metrics_empty_result_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"resultType": "matrix", "result": []}
        })))
        .mount(&server)
        .await;

    let samples = metrics(&server).query_range("absent", &window()).await.unwrap();
    assert!(samples.is_empty());
}

#[tokio::test]
async fn test_metrics_bad_request_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "unexpected end of input"
        })))
        .mount(&server)
        .await;

    let err = metrics(&server).query_range("sum(", &window()).await.unwrap_err();

    assert_eq!(
        err,
        EvidenceError::MalformedQuery {
            backend: Source::Metrics,
            reason: "unexpected end of input".to_string(),
        }
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_metrics_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = metrics(&server).query_range("up", &window()).await.unwrap_err();

    assert!(matches!(err, EvidenceError::Unavailable { backend: Source::Metrics, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_metrics_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "success", "data": {"result": []}}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = MetricsClient::new(MetricsConfig {
        base_url: server.uri(),
        timeout_secs: 1,
        ..MetricsConfig::default()
    })
    .unwrap();
    let err = client.query_range("up", &window()).await.unwrap_err();

    assert!(matches!(err, EvidenceError::Timeout { backend: Source::Metrics, .. }));
}

#[tokio::test]
async fn test_logs_range_query_sorted_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/query_range"))
        .and(query_param("direction", "backward"))
        .and(query_param("limit", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "streams",
                "result": [{
                    "stream": {"k8s_namespace_name": "database", "k8s_pod_name": "pg-0"},
                    "values": [
                        ["1772366460000000000", "second"],
                        ["1772366400000000000", "first"]
                    ]
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = logs(&server)
        .query_range(r#"{k8s_namespace_name="database"}"#, &window(), 0)
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].line, "first");
    assert_eq!(entries[1].labels["k8s_pod_name"], "pg-0");
}

#[tokio::test]
async fn test_logs_parse_error_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/query_range"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("parse error at line 1, col 5: syntax error: unexpected IDENTIFIER"),
        )
        .mount(&server)
        .await;

    let err = logs(&server)
        .query_range("{bad", &window(), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, EvidenceError::MalformedQuery { backend: Source::Logs, .. }));
    assert!(err.reason().contains("parse error"));
}

#[tokio::test]
async fn test_health_checks() {
    let metrics_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&metrics_server)
        .await;

    let logs_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&logs_server)
        .await;

    let evidence = ClusterEvidence::new(metrics(&metrics_server), logs(&logs_server));
    let health = evidence.health().await;

    assert!(health.metrics);
    assert!(!health.logs);
    assert!(!health.all_healthy());
}

#[tokio::test]
async fn test_cluster_evidence_routes_by_source() {
    let metrics_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"result": [{"metric": {}, "values": [[1772366400, "1"]]}]}
        })))
        .mount(&metrics_server)
        .await;

    let logs_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"result": []}
        })))
        .mount(&logs_server)
        .await;

    let evidence = ClusterEvidence::new(metrics(&metrics_server), logs(&logs_server));

    let samples = evidence
        .query(&EvidenceQuery {
            source: Source::Metrics,
            expression: "up".to_string(),
            range: window(),
        })
        .await
        .unwrap();
    assert!(matches!(samples, Evidence::Samples(ref s) if s.len() == 1));

    let lines = evidence
        .query(&EvidenceQuery {
            source: Source::Logs,
            expression: r#"{k8s_namespace_name="x"}"#.to_string(),
            range: window(),
        })
        .await
        .unwrap();
    assert!(lines.is_empty());
}
