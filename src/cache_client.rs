//! Read-only client for the shared response cache store
//!
//! The store exposes a REST interface: `GET <base>/get/<key>` with a bearer
//! token answers `{ "result": "<json>" }` on a hit and `{ "result": null }` on
//! a miss. This layer never writes; the origin populates the store on its
//! own execution path.

use crate::config::StoreConfig;
use crate::error::{GatewayError, Result};
use crate::models::{CacheKey, CachedEnvelope};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Source of cached execution results
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up `key`
    ///
    /// Returns `Ok(None)` when the store has no entry and an error when the
    /// store could not be asked or its answer made no sense. Callers treat
    /// both as a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedEnvelope>>;
}

/// Wire shape of a store response
#[derive(Debug, Deserialize)]
struct StoreResponse {
    #[serde(default)]
    result: Option<String>,
}

/// HTTP client for the cache store, authenticated with a read-only token
pub struct CacheReadClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl CacheReadClient {
    /// Create a client from store configuration
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Self::with_timeout(config, Duration::from_millis(config.timeout_ms))
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(config: &StoreConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            GatewayError::ConfigError(format!("Invalid store URL '{}': {}", config.base_url, e))
        })?;

        Ok(CacheReadClient {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// URL for looking up `key`
    ///
    /// The key is pushed as a single path segment, so base64 characters such
    /// as `/` are percent-encoded instead of splitting the path.
    pub fn lookup_url(&self, key: &CacheKey) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::ConfigError(format!(
                    "store URL '{}' cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("get")
            .push(key.as_str());
        Ok(url)
    }
}

#[async_trait]
impl CacheStore for CacheReadClient {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedEnvelope>> {
        let url = self.lookup_url(key)?;
        debug!("Looking up cache key={} at {}", key, url);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::CacheLookupError(format!("store timed out: {}", e))
                } else {
                    GatewayError::CacheLookupError(format!("store request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::CacheLookupError(format!(
                "store returned status {}",
                status
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            GatewayError::CacheLookupError(format!("failed to read store response: {}", e))
        })?;

        let parsed: StoreResponse = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::CacheLookupError(format!("store response is not valid JSON: {}", e))
        })?;

        match parsed.result {
            // An empty string is never a valid execution result
            Some(result) if !result.is_empty() => {
                debug!("Cache entry found for key={}", key);
                Ok(Some(CachedEnvelope::new(result)))
            }
            _ => {
                debug!("No cache entry for key={}", key);
                Ok(None)
            }
        }
    }
}
