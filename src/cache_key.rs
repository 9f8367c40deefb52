//! Cache key construction
//!
//! A key is `base64(sha1(document | operationName | canonical(variables) | sessionId))`.
//! The document is used verbatim, so whitespace differences produce
//! different keys.

use crate::canonical_json;
use crate::error::{GatewayError, Result};
use crate::models::{CacheKey, OperationDescriptor};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Separator between key tokens
pub const KEY_DELIMITER: &str = "|";

/// Builds cache keys from operation descriptors
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn new() -> Self {
        CacheKeyBuilder
    }

    /// The string that gets hashed for `descriptor`
    ///
    /// Unset fields become their placeholder: `""` for strings and `{}` for
    /// variables.
    pub fn token_string(&self, descriptor: &OperationDescriptor) -> Result<String> {
        let operation_name = descriptor.operation_name.as_deref().unwrap_or("");
        let session_id = descriptor.session_id.as_deref().unwrap_or("");

        // A delimiter in these would let two descriptors share a token string
        if operation_name.contains(KEY_DELIMITER) {
            return Err(GatewayError::KeyBuildError(format!(
                "operation name contains '{}'",
                KEY_DELIMITER
            )));
        }
        if session_id.contains(KEY_DELIMITER) {
            return Err(GatewayError::KeyBuildError(format!(
                "session id contains '{}'",
                KEY_DELIMITER
            )));
        }

        let variables = descriptor
            .variable_values
            .as_ref()
            .map(canonical_json::map_to_string)
            .unwrap_or_else(|| "{}".to_string());

        let tokens = [
            descriptor.document_string.as_deref().unwrap_or(""),
            operation_name,
            variables.as_str(),
            session_id,
        ];

        Ok(tokens.join(KEY_DELIMITER))
    }

    /// Build the cache key for `descriptor`
    pub fn build(&self, descriptor: &OperationDescriptor) -> Result<CacheKey> {
        let tokens = self.token_string(descriptor)?;
        let digest = Sha1::digest(tokens.as_bytes());
        Ok(CacheKey::new(STANDARD.encode(digest)))
    }
}
