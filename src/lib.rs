//! GraphQL Edge Response Cache Gateway
//!
//! An HTTP gateway that sits in front of a GraphQL origin and answers
//! repeated queries from a shared response cache, without waking the origin.
//!
//! # Overview
//!
//! Clients opt in per request with a routing header (by default
//! `response-cache-type: responseEdgeCache`). For such a POST the gateway
//! buffers the body, extracts the GraphQL operation, derives a deterministic
//! cache key and asks the store for a previously recorded execution result.
//! On a hit the result is returned directly, tagged with
//! `extensions.responseEdgeCache.hit = true`. On a miss, or whenever
//! anything about the caching path goes wrong, the request is forwarded to
//! the origin unchanged. The gateway only ever reads from the store.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use graphql_edge_cache::{EdgeGateway, GatewayConfig, GatewayServer};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(GatewayConfig::from_file("edge_cache.yaml")?);
//! let gateway = Arc::new(EdgeGateway::from_config(Arc::clone(&config))?);
//!
//! let server = GatewayServer::bind(config.listen_addr()?, gateway).await?;
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`RequestBodyReader`]: drains the one-shot request body stream
//! - [`ParameterExtractor`]: pulls query, operation name and variables out of the body
//! - [`CacheKeyBuilder`]: hashes an [`OperationDescriptor`] into a [`CacheKey`]
//! - [`CacheReadClient`]: read-only client for the REST cache store
//! - [`OriginClient`]: forwards requests to the origin
//! - [`EdgeGateway`]: runs the per-request state machine
//! - [`GatewayServer`]: hyper HTTP/1 front end
//! - [`GatewayMetrics`]: Prometheus counters, served by [`MetricsEndpoint`]
//!
//! # Cache keys
//!
//! The key is the base64 SHA-1 digest of
//! `query|operationName|canonicalVariables|sessionId`, where absent parts
//! default to `""`, `""`, `{}` and `""`. Variables are serialized as
//! canonical JSON (sorted keys), so `{"a":1,"b":2}` and `{"b":2,"a":1}` share
//! a key. The query text is hashed as-is.

pub mod body_reader;
pub mod cache_client;
pub mod cache_key;
pub mod canonical_json;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod origin;
pub mod params;
pub mod server;

// Re-export commonly used types
pub use body_reader::{RequestBodyReader, Utf8StreamDecoder};
pub use cache_client::{CacheReadClient, CacheStore};
pub use cache_key::CacheKeyBuilder;
pub use config::{GatewayConfig, HitHeaderPolicy, MetricsEndpointConfig, RoutingConfig, StoreConfig};
pub use error::{GatewayError, Result};
pub use gateway::{EdgeGateway, ForwardReason, GatewayContext, GatewayState};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{BufferedBody, CacheKey, CachedEnvelope, OperationDescriptor};
pub use origin::OriginClient;
pub use params::ParameterExtractor;
pub use server::GatewayServer;
