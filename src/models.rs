//! Data models for the edge cache gateway

use crate::canonical_json;
use crate::error::{GatewayError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity of a GraphQL call, extracted from the request body
///
/// Unset fields are normalized to empty placeholders when the cache key is
/// built, so `None` and `Some("")` (or an empty variables map) are
/// equivalent for caching purposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Raw query text
    pub document_string: Option<String>,
    /// Operation to execute when the document contains several
    pub operation_name: Option<String>,
    /// Variable values
    pub variable_values: Option<Map<String, Value>>,
    /// Per-user cache partition. Reserved: extraction never sets it.
    pub session_id: Option<String>,
}

impl OperationDescriptor {
    /// Descriptor with only a document set
    pub fn from_document(document: impl Into<String>) -> Self {
        OperationDescriptor {
            document_string: Some(document.into()),
            ..Default::default()
        }
    }

    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.document_string.is_none()
            && self.operation_name.is_none()
            && self.variable_values.is_none()
            && self.session_id.is_none()
    }
}

/// Opaque lookup identifier derived from an [`OperationDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub(crate) fn new(key: String) -> Self {
        CacheKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store response for a key lookup: `{ "result": "<json>" | null }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEnvelope {
    /// JSON-encoded execution result written by the origin
    pub result: String,
}

impl CachedEnvelope {
    pub fn new(result: impl Into<String>) -> Self {
        CachedEnvelope {
            result: result.into(),
        }
    }

    /// Decode the stored execution result
    ///
    /// The result must decode to a JSON object; anything else is reported as
    /// a [`GatewayError::CacheLookupError`] so the caller treats it as a miss.
    pub fn decode(&self) -> Result<Map<String, Value>> {
        match serde_json::from_str::<Value>(&self.result) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(GatewayError::CacheLookupError(format!(
                "cached result is not an object: {}",
                json_kind(&other)
            ))),
            Err(e) => Err(GatewayError::CacheLookupError(format!(
                "cached result is not valid JSON: {}",
                e
            ))),
        }
    }

    /// Decode the stored result and mark it as served by `tier`
    ///
    /// Produces `{ ...result, extensions: { ...result.extensions, <tier>: { hit: true } } }`
    /// serialized as canonical JSON. `data`, `errors` and unrelated
    /// extensions written by the origin are preserved.
    pub fn to_hit_body(&self, tier: &str) -> Result<String> {
        let mut payload = self.decode()?;
        mark_hit(&mut payload, tier);
        Ok(canonical_json::to_string(&Value::Object(payload)))
    }
}

/// Deep-merge `{ extensions: { <tier>: { hit: true } } }` into `payload`
pub fn mark_hit(payload: &mut Map<String, Value>, tier: &str) {
    let extensions = payload
        .entry("extensions")
        .or_insert_with(|| Value::Object(Map::new()));
    if !extensions.is_object() {
        *extensions = Value::Object(Map::new());
    }

    if let Value::Object(extensions) = extensions {
        let marker = extensions
            .entry(tier)
            .or_insert_with(|| Value::Object(Map::new()));
        match marker {
            Value::Object(marker) => {
                marker.insert("hit".to_string(), Value::Bool(true));
            }
            other => {
                let mut map = Map::new();
                map.insert("hit".to_string(), Value::Bool(true));
                *other = Value::Object(map);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Fully drained request body
///
/// `bytes` is what the client sent and is what gets forwarded to the origin.
/// `text` is the UTF-8 decoding used for parameter extraction, without a
/// leading byte order mark. It is left empty when `over_limit` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedBody {
    pub bytes: Bytes,
    pub text: String,
    pub over_limit: bool,
}

impl BufferedBody {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
