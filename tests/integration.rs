//! Integration tests for dogstatsd-sift.

use axum::body::Body;
use axum::http::Request;
use dogstatsd_sift::codec;
use dogstatsd_sift::interceptor::SERIES_ENDPOINT;
use dogstatsd_sift::mutation;
use dogstatsd_sift::{
    DataPoint, Disposition, Interceptor, Metric, RuleSet, SeriesPayload, SiftConfig,
    HOST_OVERRIDE,
};
use std::sync::Arc;

// =============================================================================
// Helpers
// =============================================================================

fn agent_payload() -> SeriesPayload {
    SeriesPayload::new(vec![
        Metric {
            metric_type: Some("gauge".to_string()),
            interval: Some(10),
            ..Metric::new(
                "system.load.1",
                vec![DataPoint(1546300800.0, 0.25), DataPoint(1546300810.0, 0.5)],
            )
            .with_host("i-0abc123")
            .with_tags(["env:prod", "team:core"])
        },
        Metric::new("request.200", vec![DataPoint(1546300800.0, 12.0)])
            .with_host("i-0abc123")
            .with_tags(["status:200", "env:prod", "pod_name:web-1"]),
        Metric::new("secret.metric", vec![DataPoint(1546300800.0, 1.0)])
            .with_host("i-0abc123"),
        Metric::new("request.500", vec![DataPoint(1546300800.0, 3.0)])
            .with_host("i-0abc123"),
    ])
}

fn interceptor_from_yaml(yaml: &str) -> Interceptor {
    let config = SiftConfig::from_yaml(yaml).unwrap();
    let rules = RuleSet::from_config(&config);
    Interceptor::new(Some(Arc::new(rules)), config.max_body_size)
        .with_max_inflated_size(config.max_inflated_size)
}

fn series_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(SERIES_ENDPOINT)
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "deflate")
        .header("Content-Length", body.len())
        .body(Body::from(body))
        .unwrap()
}

fn point_bits(points: &[DataPoint]) -> Vec<(u64, u64)> {
    points
        .iter()
        .map(|p| (p.0.to_bits(), p.1.to_bits()))
        .collect()
}

async fn forwarded(interceptor: &Interceptor, body: Vec<u8>) -> (Disposition, usize, Vec<u8>) {
    let result = interceptor.intercept(series_request(body)).await;
    let length = result.request.headers()["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = axum::body::to_bytes(result.request.into_body(), usize::MAX)
        .await
        .unwrap();
    (result.disposition, length, body.to_vec())
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_parse_minimal_config() {
    let config = SiftConfig::from_yaml("port: 9000\n").unwrap();
    assert_eq!(config.port, 9000);
    assert!(config.metrics.is_empty());
}

#[test]
fn test_parse_json_config() {
    let json = r#"{
        "port": 8125,
        "origin": "http://localhost:8080",
        "remove_all_host": true,
        "metrics": [
            {"name": "request.200", "remove_tags": ["status:200"]}
        ]
    }"#;
    let config = SiftConfig::from_json(json).unwrap();
    assert_eq!(config.port, 8125);
    assert_eq!(config.origin, "http://localhost:8080");

    let rules = RuleSet::from_config(&config);
    assert!(rules.remove_all_host());
    assert_eq!(rules.matching("request.200").count(), 1);
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[tokio::test]
async fn test_full_pipeline() {
    let interceptor = interceptor_from_yaml(
        r#"
remove_all_host: false
metrics:
  - name: secret.metric
    remove_metric: true
  - name: request.200
    remove_tags: ["status:200", "pod_name:web-1"]
    remove_host: true
"#,
    );

    let body = codec::encode(&agent_payload()).unwrap();
    let (disposition, length, body) = forwarded(&interceptor, body).await;
    assert_eq!(disposition, Disposition::Mutated);
    assert_eq!(length, body.len());

    let payload = codec::decode(&body).unwrap();
    assert_eq!(
        payload.names(),
        ["system.load.1", "request.200", "request.500"]
    );

    let request = &payload.series[1];
    assert_eq!(request.tags(), ["env:prod"]);
    assert_eq!(request.host.as_deref(), Some(HOST_OVERRIDE));

    // Untouched series are identical to what the agent sent.
    let original = agent_payload();
    assert_eq!(payload.series[0], original.series[0]);
    assert_eq!(payload.series[2], original.series[3]);
}

#[tokio::test]
async fn test_global_host_override() {
    let interceptor = interceptor_from_yaml("remove_all_host: true\n");

    let body = codec::encode(&agent_payload()).unwrap();
    let (_, _, body) = forwarded(&interceptor, body).await;

    let payload = codec::decode(&body).unwrap();
    assert_eq!(payload.series.len(), 4);
    for (metric, original) in payload.series.iter().zip(agent_payload().series) {
        assert_eq!(metric.host.as_deref(), Some("dogstatsd-sift"));
        assert_eq!(metric.points, original.points);
        assert_eq!(metric.tags(), original.tags());
    }
}

#[tokio::test]
async fn test_points_are_never_mutated() {
    let interceptor = interceptor_from_yaml(
        r#"
remove_all_host: true
metrics:
  - name: system.load.1
    remove_tags: ["env:prod"]
    remove_host: true
  - name: request.500
    remove_metric: true
"#,
    );

    let original = agent_payload();
    let (_, _, body) = forwarded(&interceptor, codec::encode(&original).unwrap()).await;
    let payload = codec::decode(&body).unwrap();

    for metric in &payload.series {
        let before = original
            .series
            .iter()
            .find(|m| m.name == metric.name)
            .unwrap();
        assert_eq!(point_bits(&before.points), point_bits(&metric.points));
    }
}

#[tokio::test]
async fn test_non_deflate_body_is_forwarded_unchanged() {
    let interceptor = interceptor_from_yaml(
        r#"
metrics:
  - name: secret.metric
    remove_metric: true
"#,
    );

    let body = serde_json::to_vec(&agent_payload()).unwrap();
    let (disposition, length, forwarded_body) = forwarded(&interceptor, body.clone()).await;

    assert_eq!(disposition, Disposition::Unmodified);
    assert_eq!(length, body.len());
    assert_eq!(forwarded_body, body);
}

#[tokio::test]
async fn test_pass_through_is_byte_identical() {
    let interceptor = interceptor_from_yaml("remove_all_host: true\n");
    let body = codec::encode(&agent_payload()).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/series/")
        .header("Content-Encoding", "deflate")
        .body(Body::from(body.clone()))
        .unwrap();

    let result = interceptor.intercept(request).await;
    assert_eq!(result.disposition, Disposition::Unmodified);
    let forwarded = axum::body::to_bytes(result.request.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(forwarded, body);
}

#[tokio::test]
async fn test_concurrent_requests_share_rules() {
    let interceptor = Arc::new(interceptor_from_yaml(
        r#"
metrics:
  - name: secret.metric
    remove_metric: true
"#,
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let interceptor = interceptor.clone();
        handles.push(tokio::spawn(async move {
            let body = codec::encode(&agent_payload()).unwrap();
            let (_, _, body) = forwarded(&interceptor, body).await;
            codec::decode(&body).unwrap()
        }));
    }

    for handle in handles {
        let payload = handle.await.unwrap();
        assert_eq!(payload.series.len(), 3);
        assert!(!payload.names().contains(&"secret.metric"));
    }

    let stats = interceptor.stats();
    assert_eq!(stats.requests_total, 16);
    assert_eq!(stats.requests_mutated, 16);
    assert_eq!(stats.metrics_removed, 16);
}

// =============================================================================
// Engine Tests
// =============================================================================

#[test]
fn test_engine_is_pure() {
    let config = SiftConfig::from_yaml(
        r#"
metrics:
  - name: request.200
    remove_tags: ["status:200"]
"#,
    )
    .unwrap();
    let rules = RuleSet::from_config(&config);

    let (first, _) = mutation::apply(agent_payload(), &rules, HOST_OVERRIDE);
    let (second, _) = mutation::apply(agent_payload(), &rules, HOST_OVERRIDE);
    assert_eq!(first, second);
    assert_eq!(first.series[1].tags(), ["env:prod", "pod_name:web-1"]);
}
