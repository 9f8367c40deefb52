//! Forwarding of requests to the GraphQL origin

use crate::error::{GatewayError, Result};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, Response, Uri};
use http_body_util::Full;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection-scoped headers that must not be relayed by a proxy
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether `name` is a hop-by-hop header
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy of `headers` without hop-by-hop entries
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// HTTP client for the origin server
pub struct OriginClient {
    client: Client,
    base_url: Url,
}

impl OriginClient {
    /// Create a client for the origin at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(base_url).map_err(|e| {
            GatewayError::ConfigError(format!("Invalid origin URL '{}': {}", base_url, e))
        })?;

        Ok(OriginClient { client, base_url })
    }

    /// Origin URL for an inbound request URI
    ///
    /// The inbound path and query are appended to the configured base URL.
    pub fn target_url(&self, uri: &Uri) -> Result<Url> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let base = self.base_url.as_str().trim_end_matches('/');
        let target = format!("{}{}", base, path_and_query);

        Url::parse(&target).map_err(|e| {
            GatewayError::OriginForwardError(format!("Invalid origin target '{}': {}", target, e))
        })
    }

    /// Forward a request and relay the origin's answer
    ///
    /// `body` is sent exactly as buffered. Hop-by-hop headers, `host` and
    /// `content-length` are dropped from the request since the client sets
    /// them for the new connection. The response status, end-to-end headers
    /// and body come back unchanged.
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Full<Bytes>>> {
        let url = self.target_url(uri)?;
        debug!("Forwarding to origin: method={}, url={}, body_bytes={}", method, url, body.len());

        let mut request_headers = end_to_end_headers(headers);
        request_headers.remove(header::HOST);
        request_headers.remove(header::CONTENT_LENGTH);

        let response = self
            .client
            .request(method, url.clone())
            .headers(request_headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!("Origin request failed for url={}: {}", url, e);
                GatewayError::from_origin_error(&e)
            })?;

        let status = response.status();
        let response_headers = end_to_end_headers(response.headers());
        let bytes = response.bytes().await.map_err(|e| {
            warn!("Failed to read origin response for url={}: {}", url, e);
            GatewayError::from_origin_error(&e)
        })?;

        debug!("Origin responded: url={}, status={}, body_bytes={}", url, status, bytes.len());

        let mut relayed = Response::builder()
            .status(status)
            .body(Full::new(bytes))?;
        *relayed.headers_mut() = response_headers;

        Ok(relayed)
    }
}
