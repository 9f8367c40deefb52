//! Configuration management for the edge cache gateway

use crate::error::{GatewayError, Result};
use http::HeaderName;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted by [`GatewayConfig::apply_env_overrides`]
pub const ENV_LISTEN_ADDRESS: &str = "EDGE_CACHE_LISTEN_ADDRESS";
pub const ENV_ORIGIN_URL: &str = "EDGE_CACHE_ORIGIN_URL";
pub const ENV_STORE_URL: &str = "EDGE_CACHE_STORE_URL";
pub const ENV_STORE_TOKEN: &str = "EDGE_CACHE_STORE_TOKEN";
pub const ENV_ROUTING_HEADER: &str = "EDGE_CACHE_ROUTING_HEADER";
pub const ENV_TIER: &str = "EDGE_CACHE_TIER";

/// Configuration for the edge cache gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the gateway listens on (default: 127.0.0.1:8787)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Base URL of the GraphQL origin. The original path and query are
    /// appended when forwarding.
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Origin request timeout in milliseconds (default: 30000)
    #[serde(default = "default_origin_timeout_ms")]
    pub origin_timeout_ms: u64,

    /// Largest eligible request body the gateway will decode and key (default: 1MB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Routing header selecting this cache tier
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Remote read-only cache store
    #[serde(default)]
    pub store: StoreConfig,

    /// Which headers accompany a response served from cache
    #[serde(default)]
    pub hit_headers: HitHeaderPolicy,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Per-request opt-in to this cache tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    /// Header carrying the requested tier, matched case-insensitively
    /// (default: "response-cache-type")
    #[serde(default = "default_routing_header")]
    pub header_name: String,

    /// Tier name this gateway serves; also the key of the hit marker
    /// inserted into `extensions` (default: "responseEdgeCache")
    #[serde(default = "default_tier_name")]
    pub tier_name: String,
}

/// Connection settings for the shared key-value store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// REST base URL; lookups go to `<base_url>/get/<key>`
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Read-only bearer token
    #[serde(default)]
    pub token: String,

    /// Lookup timeout in milliseconds (default: 2000)
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

/// Header propagation on a cache hit
///
/// ```yaml
/// hit_headers:
///   policy: select
///   names: ["x-request-id"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HitHeaderPolicy {
    /// Only `content-type` is set on the synthesized response
    #[default]
    None,
    /// Copy every end-to-end request header onto the response
    ForwardAll,
    /// Copy only the named request headers
    Select { names: Vec<String> },
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9091")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            header_name: default_routing_header(),
            tier_name: default_tier_name(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            token: String::new(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_origin_url() -> String {
    "http://127.0.0.1:8888".to_string()
}

fn default_origin_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_routing_header() -> String {
    "response-cache-type".to_string()
}

fn default_tier_name() -> String {
    "responseEdgeCache".to_string()
}

fn default_store_url() -> String {
    "http://127.0.0.1:8079".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

fn default_metrics_address() -> String {
    "127.0.0.1:9091".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: default_listen_address(),
            origin_url: default_origin_url(),
            origin_timeout_ms: default_origin_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            routing: RoutingConfig::default(),
            store: StoreConfig::default(),
            hit_headers: HitHeaderPolicy::default(),
            metrics_endpoint: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    ///
    /// Environment overrides are applied on top of the file contents before
    /// validation, so secrets such as the store token can stay out of the
    /// file.
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(GatewayError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })
    }

    /// Build configuration from defaults and the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment
    ///
    /// `lookup` resolves a variable name to its value; production code passes
    /// `std::env::var`, tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_LISTEN_ADDRESS) {
            self.listen_address = v;
        }
        if let Some(v) = lookup(ENV_ORIGIN_URL) {
            self.origin_url = v;
        }
        if let Some(v) = lookup(ENV_STORE_URL) {
            self.store.base_url = v;
        }
        if let Some(v) = lookup(ENV_STORE_TOKEN) {
            self.store.token = v;
        }
        if let Some(v) = lookup(ENV_ROUTING_HEADER) {
            self.routing.header_name = v;
        }
        if let Some(v) = lookup(ENV_TIER) {
            self.routing.tier_name = v;
        }
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - origin_url and store.base_url must be http(s) URLs
    /// - store.token must not be empty
    /// - routing.header_name must be a valid HTTP header name
    /// - routing.tier_name must not be empty
    /// - timeouts and max_body_bytes must be > 0
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        validate_http_url("origin_url", &self.origin_url)?;
        validate_http_url("store.base_url", &self.store.base_url)?;

        if self.store.token.trim().is_empty() {
            return Err(GatewayError::ConfigError(format!(
                "store.token must not be empty (set it in the config file or {})",
                ENV_STORE_TOKEN
            )));
        }

        if HeaderName::from_bytes(self.routing.header_name.as_bytes()).is_err() {
            return Err(GatewayError::ConfigError(format!(
                "routing.header_name '{}' is not a valid HTTP header name",
                self.routing.header_name
            )));
        }

        if self.routing.tier_name.is_empty() {
            return Err(GatewayError::ConfigError(
                "routing.tier_name must not be empty".to_string(),
            ));
        }

        if self.origin_timeout_ms == 0 {
            return Err(GatewayError::ConfigError(
                "origin_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.store.timeout_ms == 0 {
            return Err(GatewayError::ConfigError(
                "store.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(GatewayError::ConfigError(
                "max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if let HitHeaderPolicy::Select { names } = &self.hit_headers {
            for name in names {
                if HeaderName::from_bytes(name.as_bytes()).is_err() {
                    return Err(GatewayError::ConfigError(format!(
                        "hit_headers name '{}' is not a valid HTTP header name",
                        name
                    )));
                }
            }
        }

        if let Some(endpoint) = &self.metrics_endpoint {
            if endpoint.enabled {
                endpoint.address.parse::<SocketAddr>().map_err(|e| {
                    GatewayError::ConfigError(format!(
                        "metrics_endpoint.address '{}' is invalid: {}",
                        endpoint.address, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            GatewayError::ConfigError(format!(
                "listen_address '{}' is invalid: {}",
                self.listen_address, e
            ))
        })
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_millis(self.origin_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| {
        GatewayError::ConfigError(format!("{} '{}' is not a valid URL: {}", field, value, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(GatewayError::ConfigError(format!(
            "{} must use http or https, got '{}'",
            field, other
        ))),
    }
}
