//! Metrics collection for the edge cache gateway
//!
//! Counters and histograms live in a per-gateway prometheus [`Registry`], so
//! several gateways (or tests) in one process never share state.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Metrics collector for the gateway
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    lookups_total: IntCounterVec,
    key_failures_total: IntCounterVec,
    origin_requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    lookup_duration_seconds: Histogram,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub eligible_requests: u64,
    pub passthrough_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub lookup_errors: u64,

    pub oversized_bodies: u64,
    pub parse_failures: u64,
    pub key_failures: u64,

    pub origin_requests: u64,
    pub origin_failures: u64,
}

impl GatewayMetrics {
    /// Create a collector backed by its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create a collector registered in `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("edge_cache_requests_total", "Requests received by route decision"),
            &["route"], // route: eligible, passthrough
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let lookups_total = IntCounterVec::new(
            Opts::new("edge_cache_lookups_total", "Cache store lookups by result"),
            &["result"], // result: hit, miss, error
        )?;
        registry.register(Box::new(lookups_total.clone()))?;

        let key_failures_total = IntCounterVec::new(
            Opts::new(
                "edge_cache_key_failures_total",
                "Eligible requests that could not be keyed",
            ),
            &["stage"], // stage: body_limit, parse, key
        )?;
        registry.register(Box::new(key_failures_total.clone()))?;

        let origin_requests_total = IntCounterVec::new(
            Opts::new("edge_cache_origin_requests_total", "Requests forwarded to origin"),
            &["result"], // result: success, failure
        )?;
        registry.register(Box::new(origin_requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "edge_cache_request_duration_seconds",
                "End-to-end request duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["outcome"], // outcome: hit, forward, error
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let lookup_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "edge_cache_lookup_duration_seconds",
                "Cache store lookup duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(lookup_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            lookups_total,
            key_failures_total,
            origin_requests_total,
            request_duration_seconds,
            lookup_duration_seconds,
        })
    }

    /// Record a request and whether it opted into this cache tier
    pub fn record_request(&self, eligible: bool) {
        let route = if eligible { "eligible" } else { "passthrough" };
        self.requests_total.with_label_values(&[route]).inc();
    }

    pub fn record_cache_hit(&self) {
        self.lookups_total.with_label_values(&["hit"]).inc();
    }

    pub fn record_cache_miss(&self) {
        self.lookups_total.with_label_values(&["miss"]).inc();
    }

    /// Record a lookup that failed and was treated as a miss
    pub fn record_lookup_error(&self) {
        self.lookups_total.with_label_values(&["error"]).inc();
    }

    /// Record an eligible body too large to decode
    pub fn record_body_over_limit(&self) {
        self.key_failures_total.with_label_values(&["body_limit"]).inc();
    }

    pub fn record_parse_failure(&self) {
        self.key_failures_total.with_label_values(&["parse"]).inc();
    }

    pub fn record_key_failure(&self) {
        self.key_failures_total.with_label_values(&["key"]).inc();
    }

    pub fn record_origin_request(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.origin_requests_total.with_label_values(&[result]).inc();
    }

    pub fn observe_lookup_duration(&self, duration: Duration) {
        self.lookup_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn observe_request_duration(&self, outcome: &str, duration: Duration) {
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    /// Get a snapshot of current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        let eligible_requests = self.requests_total.with_label_values(&["eligible"]).get();
        let passthrough_requests = self.requests_total.with_label_values(&["passthrough"]).get();
        let origin_successes = self.origin_requests_total.with_label_values(&["success"]).get();
        let origin_failures = self.origin_requests_total.with_label_values(&["failure"]).get();

        MetricsSnapshot {
            total_requests: eligible_requests + passthrough_requests,
            eligible_requests,
            passthrough_requests,
            cache_hits: self.lookups_total.with_label_values(&["hit"]).get(),
            cache_misses: self.lookups_total.with_label_values(&["miss"]).get(),
            lookup_errors: self.lookups_total.with_label_values(&["error"]).get(),
            oversized_bodies: self.key_failures_total.with_label_values(&["body_limit"]).get(),
            parse_failures: self.key_failures_total.with_label_values(&["parse"]).get(),
            key_failures: self.key_failures_total.with_label_values(&["key"]).get(),
            origin_requests: origin_successes + origin_failures,
            origin_failures,
        }
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0), lookup errors count as misses
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses + self.lookup_errors;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }
}
