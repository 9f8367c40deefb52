//! Integration tests for the gateway request flow
//!
//! A wiremock server stands in for the cache store and another for the
//! origin. These tests cover:
//! - Pass-through of requests that do not opt in
//! - Cache miss, cache hit and key determinism
//! - Fail-open behavior when parsing or the store goes wrong
//! - Propagation of body and origin failures

use bytes::Bytes;
use graphql_edge_cache::{
    EdgeGateway, ForwardReason, GatewayConfig, GatewayContext, GatewayError, GatewayState,
    HitHeaderPolicy, StoreConfig,
};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCENARIO_BODY: &str = r#"{"query":"{ hi }","operationName":null,"variables":null}"#;
const SCENARIO_KEY: &str = "B39JH/DUSk+NwkgUzHZUYzDaGo0=";
const SCENARIO_KEY_PATH: &str = "/get/B39JH%2FDUSk+NwkgUzHZUYzDaGo0=";

fn test_config(store_url: &str, origin_url: &str) -> GatewayConfig {
    GatewayConfig {
        origin_url: origin_url.to_string(),
        origin_timeout_ms: 2_000,
        store: StoreConfig {
            base_url: store_url.to_string(),
            token: "test-token".to_string(),
            timeout_ms: 500,
        },
        ..Default::default()
    }
}

fn create_gateway(config: GatewayConfig) -> EdgeGateway {
    EdgeGateway::from_config(Arc::new(config)).unwrap()
}

fn eligible_request(body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::POST)
        .uri("/.netlify/functions/graphql")
        .header("content-type", "application/json")
        .header("response-cache-type", "responseEdgeCache")
        .header("x-request-id", "req-1")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn body_text(response: http::Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn mount_store_result(store: &MockServer, result: serde_json::Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path_regex("^/get/.+"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": result })))
        .expect(expected_calls)
        .mount(store)
        .await;
}

async fn mount_origin(origin: &MockServer, expected_body: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/.netlify/functions/graphql"))
        .and(body_string(expected_body))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"data":{"hi":"from origin"}}"#),
        )
        .expect(expected_calls)
        .mount(origin)
        .await;
}

#[tokio::test]
async fn test_get_without_routing_header_passes_through() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&store)
        .await;
    Mock::given(method("GET"))
        .and(path("/.netlify/functions/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("origin says hi"))
        .expect(1)
        .mount(&origin)
        .await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let request = Request::builder()
        .method(Method::GET)
        .uri("/.netlify/functions/graphql?query=%7Bhi%7D")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let mut ctx = GatewayContext::new();
    let response = gateway.handle_with_ctx(request, &mut ctx).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "origin says hi");
    assert!(!ctx.is_eligible());
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::NotEligible));
    assert!(ctx.cache_key().is_none());

    let received = origin.received_requests().await.unwrap();
    assert_eq!(received[0].url.query(), Some("query=%7Bhi%7D"));
    assert_eq!(gateway.metrics().snapshot().passthrough_requests, 1);
}

#[tokio::test]
async fn test_post_for_other_tier_passes_through_with_body() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 0).await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/.netlify/functions/graphql")
        .header("response-cache-type", "responseCache")
        .body(Full::new(Bytes::from_static(SCENARIO_BODY.as_bytes())))
        .unwrap();

    let response = gateway.handle(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cache_miss_forwards_original_body() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 1).await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_text(response).await, r#"{"data":{"hi":"from origin"}}"#);

    assert_eq!(ctx.state(), GatewayState::ForwardToOrigin);
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::CacheMiss));
    assert_eq!(ctx.cache_key().unwrap().as_str(), SCENARIO_KEY);

    let lookups = store.received_requests().await.unwrap();
    assert_eq!(lookups[0].url.path(), SCENARIO_KEY_PATH);

    let stats = gateway.metrics().snapshot();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.origin_requests, 1);
}

#[tokio::test]
async fn test_missing_result_field_is_a_miss() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&store)
        .await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::CacheMiss));
}

#[tokio::test]
async fn test_cache_hit_skips_origin() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(r#"{"data":{"hi":"there"}}"#), 1).await;
    mount_origin(&origin, SCENARIO_BODY, 0).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Default policy copies no request headers
    assert!(response.headers().get("x-request-id").is_none());
    assert_eq!(
        body_text(response).await,
        r#"{"data":{"hi":"there"},"extensions":{"responseEdgeCache":{"hit":true}}}"#
    );
    assert_eq!(ctx.state(), GatewayState::ServeFromCache);
    assert_eq!(gateway.metrics().snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_cache_hit_merges_existing_extensions_canonically() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(
        &store,
        json!(r#"{"extensions":{"tracing":{"ms":3}},"data":{"z":1,"a":[true,null]}}"#),
        1,
    )
    .await;
    mount_origin(&origin, SCENARIO_BODY, 0).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let response = gateway.handle(eligible_request(SCENARIO_BODY)).await.unwrap();

    assert_eq!(
        body_text(response).await,
        r#"{"data":{"a":[true,null],"z":1},"extensions":{"responseEdgeCache":{"hit":true},"tracing":{"ms":3}}}"#
    );
}

#[tokio::test]
async fn test_cache_hit_forward_all_headers() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(r#"{"data":{}}"#), 1).await;

    let mut config = test_config(&store.uri(), &origin.uri());
    config.hit_headers = HitHeaderPolicy::ForwardAll;
    let gateway = create_gateway(config);

    let response = gateway.handle(eligible_request(SCENARIO_BODY)).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-1");
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert!(response.headers().get("content-length").is_none());
}

#[tokio::test]
async fn test_variable_order_shares_cache_key() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 2).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(2)
        .mount(&origin)
        .await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));

    let mut first = GatewayContext::new();
    gateway
        .handle_with_ctx(
            eligible_request(r#"{"query":"{ post(id: $id) { title } }","operationName":"Post","variables":{"b":2,"a":1}}"#),
            &mut first,
        )
        .await
        .unwrap();

    let mut second = GatewayContext::new();
    gateway
        .handle_with_ctx(
            eligible_request(r#"{"variables":{"a":1,"b":2},"operationName":"Post","query":"{ post(id: $id) { title } }"}"#),
            &mut second,
        )
        .await
        .unwrap();

    assert_eq!(first.cache_key(), second.cache_key());
    assert_eq!(
        first.cache_key().unwrap().as_str(),
        "gUi98wuXBMrjOckGGxO9gXYumpI="
    );
}

#[tokio::test]
async fn test_invalid_json_forwards_raw_body() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    let truncated = r#"{"query":"{ hi }""#;
    mount_store_result(&store, json!(null), 0).await;
    mount_origin(&origin, truncated, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(truncated), &mut ctx)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::ParseFailed));
    assert!(matches!(ctx.recovered_error(), Some(GatewayError::ParseError(_))));
    assert_eq!(gateway.metrics().snapshot().parse_failures, 1);
}

#[tokio::test]
async fn test_store_error_status_fails_open() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&store)
        .await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::LookupFailed));
    assert!(matches!(
        ctx.recovered_error(),
        Some(GatewayError::CacheLookupError(_))
    ));
    assert_eq!(gateway.metrics().snapshot().lookup_errors, 1);
}

#[tokio::test]
async fn test_store_garbage_fails_open() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&store)
        .await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::LookupFailed));
}

#[tokio::test]
async fn test_cached_result_not_an_object_fails_open() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!("not json at all"), 1).await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::InvalidCachedResult));
}

#[tokio::test]
async fn test_store_timeout_fails_open() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": r#"{"data":{}}"# }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&store)
        .await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let mut config = test_config(&store.uri(), &origin.uri());
    config.store.timeout_ms = 100;
    let gateway = create_gateway(config);

    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();
    assert_eq!(body_text(response).await, r#"{"data":{"hi":"from origin"}}"#);
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::LookupFailed));
}

#[tokio::test]
async fn test_store_unreachable_fails_open() {
    let origin = MockServer::start().await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    // Nothing listens on port 1
    let gateway = create_gateway(test_config("http://127.0.0.1:1", &origin.uri()));
    let response = gateway.handle(eligible_request(SCENARIO_BODY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_origin_status_and_headers_relayed() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 1).await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("retry-after", "5")
                .set_body_string("maintenance"),
        )
        .mount(&origin)
        .await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let response = gateway.handle(eligible_request(SCENARIO_BODY)).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("retry-after").unwrap(), "5");
    assert_eq!(body_text(response).await, "maintenance");
}

#[tokio::test]
async fn test_origin_unreachable_propagates() {
    let store = MockServer::start().await;
    mount_store_result(&store, json!(null), 1).await;

    let gateway = create_gateway(test_config(&store.uri(), "http://127.0.0.1:1"));
    let result = gateway.handle(eligible_request(SCENARIO_BODY)).await;

    let err = result.unwrap_err();
    assert!(matches!(err, GatewayError::OriginForwardError(_)));
    assert!(!err.is_recoverable());
    assert_eq!(err.to_http_status(), 502);
    assert_eq!(gateway.metrics().snapshot().origin_failures, 1);
}

#[tokio::test]
async fn test_origin_timeout_propagates() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 1).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&origin)
        .await;

    let mut config = test_config(&store.uri(), &origin.uri());
    config.origin_timeout_ms = 100;
    let gateway = create_gateway(config);

    let err = gateway
        .handle(eligible_request(SCENARIO_BODY))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)));
    assert_eq!(err.to_http_status(), 504);
}

#[tokio::test]
async fn test_oversized_body_forwarded_without_lookup() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(null), 0).await;
    mount_origin(&origin, SCENARIO_BODY, 1).await;

    let mut config = test_config(&store.uri(), &origin.uri());
    config.max_body_bytes = 16;
    let gateway = create_gateway(config);

    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(SCENARIO_BODY), &mut ctx)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"data":{"hi":"from origin"}}"#);
    assert_eq!(ctx.state(), GatewayState::ForwardToOrigin);
    assert_eq!(ctx.forward_reason(), Some(ForwardReason::BodyTooLarge));
    assert!(ctx.cache_key().is_none());
    assert!(matches!(
        ctx.recovered_error(),
        Some(GatewayError::BodyTooLarge { limit: 16 })
    ));

    let forwarded = origin.received_requests().await.unwrap();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].method.to_string(), "POST");
    assert_eq!(forwarded[0].body, SCENARIO_BODY.as_bytes());

    let stats = gateway.metrics().snapshot();
    assert_eq!(stats.oversized_bodies, 1);
    assert_eq!(stats.cache_misses + stats.lookup_errors, 0);
}

#[tokio::test]
async fn test_leading_bom_keys_like_plain_body() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    mount_store_result(&store, json!(r#"{"data":{"hi":"there"}}"#), 1).await;
    mount_origin(&origin, SCENARIO_BODY, 0).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let with_bom = format!("\u{FEFF}{}", SCENARIO_BODY);
    let mut ctx = GatewayContext::new();
    let response = gateway
        .handle_with_ctx(eligible_request(&with_bom), &mut ctx)
        .await
        .unwrap();

    assert_eq!(ctx.state(), GatewayState::ServeFromCache);
    assert_eq!(ctx.cache_key().unwrap().as_str(), SCENARIO_KEY);
    assert_eq!(
        body_text(response).await,
        r#"{"data":{"hi":"there"},"extensions":{"responseEdgeCache":{"hit":true}}}"#
    );
}

#[tokio::test]
async fn test_leading_bom_forwarded_unchanged_on_miss() {
    let store = MockServer::start().await;
    let origin = MockServer::start().await;
    let with_bom = format!("\u{FEFF}{}", SCENARIO_BODY);
    mount_store_result(&store, json!(null), 1).await;
    mount_origin(&origin, &with_bom, 1).await;

    let gateway = create_gateway(test_config(&store.uri(), &origin.uri()));
    let mut ctx = GatewayContext::new();
    gateway
        .handle_with_ctx(eligible_request(&with_bom), &mut ctx)
        .await
        .unwrap();

    assert_eq!(ctx.forward_reason(), Some(ForwardReason::CacheMiss));
    let forwarded = origin.received_requests().await.unwrap();
    assert_eq!(&forwarded[0].body[..3], b"\xEF\xBB\xBF");
}
