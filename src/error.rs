//! Error types for the edge cache gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types that can occur while handling a request at the edge
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read request body: {0}")]
    StreamReadError(String),

    #[error("Request body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Cache key error: {0}")]
    KeyBuildError(String),

    #[error("Cache lookup error: {0}")]
    CacheLookupError(String),

    #[error("Origin request failed: {0}")]
    OriginForwardError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<http::Error> for GatewayError {
    fn from(err: http::Error) -> Self {
        GatewayError::HttpError(err.to_string())
    }
}

impl GatewayError {
    /// Determine if the gateway can recover from this error locally
    ///
    /// Recoverable errors belong to the caching optimization itself. The
    /// gateway swallows them and forwards the request to the origin:
    /// - Oversized bodies (too large to decode, still forwarded as sent)
    /// - Parse errors (body is not a GraphQL request it understands)
    /// - Key build errors
    /// - Cache lookup errors (fail open)
    ///
    /// Everything else comes from a primitive the request cannot succeed
    /// without (reading the body, reaching the origin) and must propagate.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::BodyTooLarge { .. } => true,
            GatewayError::ParseError(_) => true,
            GatewayError::KeyBuildError(_) => true,
            GatewayError::CacheLookupError(_) => true,

            GatewayError::ConfigError(_) => false,
            GatewayError::StreamReadError(_) => false,
            GatewayError::OriginForwardError(_) => false,
            GatewayError::Timeout(_) => false,
            GatewayError::HttpError(_) => false,
            GatewayError::IoError(_) => false,
            GatewayError::InternalError(_) => false,
        }
    }

    /// Convert error to the HTTP status returned to the client
    ///
    /// Only errors that propagate out of [`crate::EdgeGateway::handle`] reach
    /// this point; recoverable errors never do.
    pub fn to_http_status(&self) -> u16 {
        match self {
            GatewayError::StreamReadError(_) => 400,
            GatewayError::BodyTooLarge { .. } => 413,
            GatewayError::ParseError(_) => 400,

            // Origin could not be reached or answered garbage
            GatewayError::OriginForwardError(_) => 502,
            GatewayError::HttpError(_) => 502,
            GatewayError::Timeout(_) => 504,

            GatewayError::ConfigError(_) => 500,
            GatewayError::KeyBuildError(_) => 500,
            GatewayError::CacheLookupError(_) => 500,
            GatewayError::IoError(_) => 500,
            GatewayError::InternalError(_) => 500,
        }
    }

    /// Map a reqwest failure talking to the origin
    pub(crate) fn from_origin_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(format!("origin did not respond in time: {}", err))
        } else {
            GatewayError::OriginForwardError(err.to_string())
        }
    }
}
