//! EdgeGateway and per-request context
//!
//! The gateway decides for each request whether it can be answered from the
//! shared response cache. A request goes through
//! `RouteCheck → BodyBuffering → KeyBuilding → CacheLookup` and ends in
//! exactly one of `ServeFromCache` or `ForwardToOrigin`.
//!
//! Only failures of the body stream or of the origin reach the caller. Every
//! failure inside the caching optimization (parsing, key building, the store
//! lookup) is logged, counted and turned into a forward to the origin.

use crate::body_reader::RequestBodyReader;
use crate::cache_client::{CacheReadClient, CacheStore};
use crate::cache_key::CacheKeyBuilder;
use crate::config::{GatewayConfig, HitHeaderPolicy};
use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::models::{CacheKey, CachedEnvelope};
use crate::origin::{end_to_end_headers, OriginClient};
use crate::params::ParameterExtractor;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use hyper::body::Body;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Processing stage of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayState {
    #[default]
    RouteCheck,
    BodyBuffering,
    KeyBuilding,
    CacheLookup,
    ServeFromCache,
    ForwardToOrigin,
}

impl GatewayState {
    /// Whether processing has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayState::ServeFromCache | GatewayState::ForwardToOrigin)
    }
}

/// Why a request went to the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardReason {
    /// Wrong method or the routing header did not select this tier
    NotEligible,
    /// Body is larger than the decode limit
    BodyTooLarge,
    /// Body is not a GraphQL request
    ParseFailed,
    /// Descriptor could not be turned into a key
    KeyBuildFailed,
    /// Store has no entry for the key
    CacheMiss,
    /// Store could not be asked
    LookupFailed,
    /// Store entry does not decode to an execution result
    InvalidCachedResult,
}

impl ForwardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardReason::NotEligible => "not_eligible",
            ForwardReason::BodyTooLarge => "body_too_large",
            ForwardReason::ParseFailed => "parse_failed",
            ForwardReason::KeyBuildFailed => "key_build_failed",
            ForwardReason::CacheMiss => "cache_miss",
            ForwardReason::LookupFailed => "lookup_failed",
            ForwardReason::InvalidCachedResult => "invalid_cached_result",
        }
    }
}

impl fmt::Display for ForwardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request state
///
/// Each request owns its context; nothing in it is shared between
/// concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct GatewayContext {
    state: GatewayState,
    eligible: bool,
    cache_key: Option<CacheKey>,
    forward_reason: Option<ForwardReason>,
    recovered_error: Option<GatewayError>,
}

impl GatewayContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    fn transition(&mut self, next: GatewayState) {
        debug!("Gateway state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Whether the request opted into this cache tier
    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    pub fn forward_reason(&self) -> Option<ForwardReason> {
        self.forward_reason
    }

    /// Error swallowed on the way to the origin, if any
    pub fn recovered_error(&self) -> Option<&GatewayError> {
        self.recovered_error.as_ref()
    }

    pub fn is_cache_hit(&self) -> bool {
        self.state == GatewayState::ServeFromCache
    }

    fn recover(&mut self, reason: ForwardReason, error: GatewayError) {
        self.forward_reason = Some(reason);
        self.recovered_error = Some(error);
    }
}

/// Response cache gateway in front of a GraphQL origin
pub struct EdgeGateway {
    config: Arc<GatewayConfig>,
    store: Arc<dyn CacheStore>,
    origin: OriginClient,
    metrics: Arc<GatewayMetrics>,
    routing_header: HeaderName,
    body_reader: RequestBodyReader,
    extractor: ParameterExtractor,
    key_builder: CacheKeyBuilder,
}

impl EdgeGateway {
    /// Assemble a gateway from its collaborators
    pub fn new(
        config: Arc<GatewayConfig>,
        store: Arc<dyn CacheStore>,
        origin: OriginClient,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let routing_header = HeaderName::from_bytes(
            config.routing.header_name.to_ascii_lowercase().as_bytes(),
        )
        .map_err(|e| {
            GatewayError::ConfigError(format!(
                "Invalid routing header '{}': {}",
                config.routing.header_name, e
            ))
        })?;

        Ok(EdgeGateway {
            body_reader: RequestBodyReader::new(config.max_body_bytes),
            config,
            store,
            origin,
            metrics,
            routing_header,
            extractor: ParameterExtractor::new(),
            key_builder: CacheKeyBuilder::new(),
        })
    }

    /// Build the gateway and its HTTP clients from configuration
    pub fn from_config(config: Arc<GatewayConfig>) -> Result<Self> {
        let store = CacheReadClient::new(&config.store)?;
        let origin = OriginClient::new(&config.origin_url, config.origin_timeout())?;
        let metrics = GatewayMetrics::new().map_err(|e| {
            GatewayError::InternalError(format!("Failed to create metrics: {}", e))
        })?;

        Self::new(config, Arc::new(store), origin, Arc::new(metrics))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn metrics_arc(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Whether a request opts into this cache tier
    ///
    /// Caching is strictly opt-in: the method must be POST and the routing
    /// header must name this tier exactly.
    pub fn route_check(&self, method: &Method, headers: &HeaderMap) -> bool {
        if method != Method::POST {
            debug!("Not cache eligible: method={}", method);
            return false;
        }

        let selected = headers
            .get(&self.routing_header)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == self.config.routing.tier_name)
            .unwrap_or(false);

        if !selected {
            debug!(
                "Not cache eligible: header {} does not select tier {}",
                self.routing_header, self.config.routing.tier_name
            );
        }
        selected
    }

    /// Handle one request
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut ctx = GatewayContext::new();
        self.handle_with_ctx(req, &mut ctx).await
    }

    /// Handle one request, recording its progress in `ctx`
    pub async fn handle_with_ctx<B>(
        &self,
        req: Request<B>,
        ctx: &mut GatewayContext,
    ) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let (parts, body) = req.into_parts();

        debug!("Incoming request for {}", parts.uri.path());
        debug!("Headers for {}: {:?}", parts.uri.path(), parts.headers);

        let result = self.process(&parts, body, ctx).await;

        let elapsed = start.elapsed();
        let outcome = match (&result, ctx.is_cache_hit()) {
            (Err(_), _) => "error",
            (Ok(_), true) => "hit",
            (Ok(_), false) => "forward",
        };
        self.metrics.observe_request_duration(outcome, elapsed);
        self.logging(&parts.method, &parts.uri, ctx, result.as_ref().err(), elapsed.as_millis() as u64);

        result
    }

    async fn process<B>(
        &self,
        parts: &Parts,
        body: B,
        ctx: &mut GatewayContext,
    ) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if !self.route_check(&parts.method, &parts.headers) {
            self.metrics.record_request(false);
            ctx.forward_reason = Some(ForwardReason::NotEligible);
            let bytes = self.body_reader.read_bytes(body).await?;
            return self
                .forward_to_origin(parts.method.clone(), parts, bytes, ctx)
                .await;
        }

        self.metrics.record_request(true);
        ctx.eligible = true;

        ctx.transition(GatewayState::BodyBuffering);
        let buffered = self.body_reader.read_to_end(body).await?;
        if buffered.over_limit {
            self.metrics.record_body_over_limit();
            warn!(
                "Body of {} bytes for {} exceeds max_body_bytes={}, forwarding to origin",
                buffered.len(),
                parts.uri.path(),
                self.body_reader.max_bytes()
            );
            ctx.recover(
                ForwardReason::BodyTooLarge,
                GatewayError::BodyTooLarge {
                    limit: self.body_reader.max_bytes(),
                },
            );
            return self
                .forward_to_origin(Method::POST, parts, buffered.bytes, ctx)
                .await;
        }

        ctx.transition(GatewayState::KeyBuilding);
        let key = match self.build_key(&parts.method, &buffered.text) {
            Ok(key) => key,
            Err(e) if e.is_recoverable() => {
                let reason = match e {
                    GatewayError::ParseError(_) => {
                        self.metrics.record_parse_failure();
                        ForwardReason::ParseFailed
                    }
                    _ => {
                        self.metrics.record_key_failure();
                        ForwardReason::KeyBuildFailed
                    }
                };
                warn!(
                    "Failed to make cache key for {}, forwarding to origin: {}",
                    parts.uri.path(),
                    e
                );
                ctx.recover(reason, e);
                return self
                    .forward_to_origin(Method::POST, parts, buffered.bytes, ctx)
                    .await;
            }
            Err(e) => return Err(e),
        };
        debug!("Cache key for {}: {}", parts.uri.path(), key);
        ctx.cache_key = Some(key.clone());

        ctx.transition(GatewayState::CacheLookup);
        let lookup_start = Instant::now();
        let lookup = self.store.get(&key).await;
        self.metrics.observe_lookup_duration(lookup_start.elapsed());

        match lookup {
            Ok(Some(envelope)) => match self.serve_from_cache(&envelope, &parts.headers) {
                Ok(response) => {
                    self.metrics.record_cache_hit();
                    info!("Cache hit for key={}", key);
                    ctx.transition(GatewayState::ServeFromCache);
                    return Ok(response);
                }
                Err(e) => {
                    self.metrics.record_lookup_error();
                    warn!("Discarding unusable cache entry for key={}: {}", key, e);
                    ctx.recover(ForwardReason::InvalidCachedResult, e);
                }
            },
            Ok(None) => {
                self.metrics.record_cache_miss();
                info!("No cached result for key={}, forwarding to origin", key);
                ctx.forward_reason = Some(ForwardReason::CacheMiss);
            }
            Err(e) => {
                self.metrics.record_lookup_error();
                warn!("Cache lookup failed for key={}, forwarding to origin: {}", key, e);
                ctx.recover(ForwardReason::LookupFailed, e);
            }
        }

        self.forward_to_origin(Method::POST, parts, buffered.bytes, ctx)
            .await
    }

    fn build_key(&self, method: &Method, body: &str) -> Result<CacheKey> {
        let descriptor = self.extractor.extract(method, body)?;
        self.key_builder.build(&descriptor)
    }

    /// Synthesize the response for a cache hit
    fn serve_from_cache(
        &self,
        envelope: &CachedEnvelope,
        request_headers: &HeaderMap,
    ) -> Result<Response<Full<Bytes>>> {
        let body = envelope.to_hit_body(&self.config.routing.tier_name)?;

        let mut response = Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from(body)))?;
        *response.headers_mut() = self.hit_headers(request_headers);
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Ok(response)
    }

    /// Request headers copied onto a cache hit response
    fn hit_headers(&self, request_headers: &HeaderMap) -> HeaderMap {
        let mut headers = match &self.config.hit_headers {
            HitHeaderPolicy::None => HeaderMap::new(),
            HitHeaderPolicy::ForwardAll => end_to_end_headers(request_headers),
            HitHeaderPolicy::Select { names } => {
                let mut selected = HeaderMap::new();
                for name in names {
                    let Ok(name) = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                    else {
                        continue;
                    };
                    for value in request_headers.get_all(&name) {
                        selected.append(name.clone(), value.clone());
                    }
                }
                selected
            }
        };

        // Describe the request body, not the synthesized one
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::CONTENT_ENCODING);
        headers.remove(header::HOST);
        headers
    }

    async fn forward_to_origin(
        &self,
        method: Method,
        parts: &Parts,
        body: Bytes,
        ctx: &mut GatewayContext,
    ) -> Result<Response<Full<Bytes>>> {
        ctx.transition(GatewayState::ForwardToOrigin);

        match self
            .origin
            .forward(method, &parts.uri, &parts.headers, body)
            .await
        {
            Ok(response) => {
                self.metrics.record_origin_request(true);
                Ok(response)
            }
            Err(e) => {
                self.metrics.record_origin_request(false);
                Err(e)
            }
        }
    }

    /// Log request completion information
    pub fn logging(
        &self,
        method: &Method,
        uri: &Uri,
        ctx: &GatewayContext,
        error: Option<&GatewayError>,
        duration_ms: u64,
    ) {
        if let Some(err) = error {
            warn!(
                "Request failed: method={}, uri={}, state={:?}, error={}, duration_ms={}",
                method,
                uri,
                ctx.state(),
                err,
                duration_ms
            );
        } else if ctx.is_cache_hit() {
            info!(
                "Served from cache: method={}, uri={}, key={}, duration_ms={}",
                method,
                uri,
                ctx.cache_key().map(|k| k.as_str()).unwrap_or("-"),
                duration_ms
            );
        } else {
            info!(
                "Forwarded to origin: method={}, uri={}, reason={}, duration_ms={}",
                method,
                uri,
                ctx.forward_reason()
                    .map(|r| r.as_str())
                    .unwrap_or("-"),
                duration_ms
            );
        }
    }
}
