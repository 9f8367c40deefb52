//! Metrics HTTP Endpoint
//!
//! Serves the gateway's counters on a separate port:
//!
//! - `/metrics`: Prometheus text exposition
//! - `/stats`: JSON snapshot of the request counters
//! - `/health`: liveness probe

use crate::metrics::GatewayMetrics;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<GatewayMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Example
    /// ```no_run
    /// use graphql_edge_cache::metrics::GatewayMetrics;
    /// use graphql_edge_cache::metrics_endpoint::MetricsEndpoint;
    /// use std::sync::Arc;
    ///
    /// let metrics = Arc::new(GatewayMetrics::new().unwrap());
    /// let endpoint = MetricsEndpoint::new(metrics, "127.0.0.1:9091".parse().unwrap());
    /// ```
    pub fn new(metrics: Arc<GatewayMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Start the metrics endpoint server
    ///
    /// Runs until the process is terminated.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        info!("Metrics available at http://{}/metrics", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<GatewayMetrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(metrics),
        "/stats" => stats_response(metrics),
        "/health" => health_response(),
        "/" => index_response(),
        _ => not_found_response(),
    }
}

fn metrics_response(metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    match metrics.encode() {
        Ok(body) => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            body,
        ),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                format!("failed to encode metrics: {}", e),
            )
        }
    }
}

/// Counter snapshot plus the derived hit rate
fn stats_response(metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    let snapshot = metrics.snapshot();
    let body = json!({
        "counters": snapshot,
        "cache_hit_rate": snapshot.cache_hit_rate(),
    });
    text_response(StatusCode::OK, "application/json", body.to_string())
}

fn health_response() -> Response<Full<Bytes>> {
    text_response(
        StatusCode::OK,
        "application/json",
        r#"{"status":"healthy"}"#.to_string(),
    )
}

fn index_response() -> Response<Full<Bytes>> {
    let body = r#"<!DOCTYPE html>
<html>
<head>
    <title>GraphQL Edge Cache Metrics</title>
</head>
<body>
    <h1>GraphQL Edge Cache Metrics Endpoint</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus format metrics</li>
        <li><a href="/stats">/stats</a> - JSON counters</li>
        <li><a href="/health">/health</a> - Health check endpoint</li>
    </ul>
</body>
</html>"#;

    text_response(StatusCode::OK, "text/html; charset=utf-8", body.to_string())
}

fn not_found_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string())
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request(true);
        metrics.record_cache_hit();

        let response = route("/metrics", &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("edge_cache_requests_total{route=\"eligible\"} 1"));
        assert!(body.contains("edge_cache_lookups_total{result=\"hit\"} 1"));
    }

    #[tokio::test]
    async fn test_stats_route() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let response = route("/stats", &metrics);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");

        let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(value["counters"]["cache_hits"], 1);
        assert_eq!(value["counters"]["cache_misses"], 1);
        assert_eq!(value["cache_hit_rate"], 50.0);
    }

    #[test]
    fn test_health_and_unknown_routes() {
        let metrics = GatewayMetrics::new().unwrap();
        assert_eq!(route("/health", &metrics).status(), StatusCode::OK);
        assert_eq!(route("/", &metrics).status(), StatusCode::OK);
        assert_eq!(route("/nope", &metrics).status(), StatusCode::NOT_FOUND);
    }
}
