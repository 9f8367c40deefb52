//! Integration tests for the metrics endpoint
//!
//! The endpoint is started on a free port and queried over HTTP.

use graphql_edge_cache::{GatewayMetrics, MetricsEndpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn start_endpoint(metrics: Arc<GatewayMetrics>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    // Find an available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = MetricsEndpoint::new(metrics, addr);
    let handle = tokio::spawn(async move {
        let _ = endpoint.start().await;
    });

    // Give it a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;
    (addr, handle)
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    metrics.record_request(true);
    metrics.record_request(false);
    metrics.record_cache_hit();
    metrics.record_origin_request(true);

    let (addr, handle) = start_endpoint(Arc::clone(&metrics)).await;

    let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("# TYPE edge_cache_requests_total counter"));
    assert!(body.contains("edge_cache_requests_total{route=\"passthrough\"} 1"));
    assert!(body.contains("edge_cache_lookups_total{result=\"hit\"} 1"));
    assert!(body.contains("edge_cache_origin_requests_total{result=\"success\"} 1"));

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_reflects_new_counts() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = start_endpoint(Arc::clone(&metrics)).await;

    metrics.record_cache_miss();
    metrics.record_cache_miss();

    let body = reqwest::get(format!("http://{}/stats", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["counters"]["cache_misses"], 2);
    assert_eq!(stats["cache_hit_rate"], 0.0);

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_health_and_not_found() {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let (addr, handle) = start_endpoint(metrics).await;

    let health = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), r#"{"status":"healthy"}"#);

    let missing = reqwest::get(format!("http://{}/unknown", addr)).await.unwrap();
    assert_eq!(missing.status(), 404);

    handle.abort();
}
