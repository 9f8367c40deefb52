//! Extraction of GraphQL request parameters from a buffered body

use crate::error::{GatewayError, Result};
use crate::models::OperationDescriptor;
use http::Method;
use serde_json::{Map, Value};
use tracing::debug;

/// Projects a GraphQL-over-HTTP body onto an [`OperationDescriptor`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterExtractor;

impl ParameterExtractor {
    pub fn new() -> Self {
        ParameterExtractor
    }

    /// Extract the operation descriptor for a request
    ///
    /// Only POST carries a GraphQL body. For any other method the body is not
    /// looked at and every field of the descriptor stays unset.
    ///
    /// For POST the body must be a JSON object. `query`, `operationName` and
    /// `variables` are projected onto the descriptor; missing or `null`
    /// members leave the field unset.
    ///
    /// # Errors
    /// [`GatewayError::ParseError`] when the body is not JSON, is not an
    /// object, or a member has the wrong type.
    pub fn extract(&self, method: &Method, body: &str) -> Result<OperationDescriptor> {
        if method != Method::POST {
            debug!("Skipping parameter extraction for method={}", method);
            return Ok(OperationDescriptor::default());
        }

        let value: Value = serde_json::from_str(body)
            .map_err(|e| GatewayError::ParseError(format!("request body is not valid JSON: {}", e)))?;

        let Value::Object(mut request) = value else {
            return Err(GatewayError::ParseError(
                "request body is not a JSON object".to_string(),
            ));
        };

        let descriptor = OperationDescriptor {
            document_string: take_string(&mut request, "query")?,
            operation_name: take_string(&mut request, "operationName")?,
            variable_values: take_object(&mut request, "variables")?,
            session_id: None,
        };

        debug!(
            "Extracted operation: operation_name={:?}, variables={}",
            descriptor.operation_name,
            descriptor.variable_values.as_ref().map_or(0, |v| v.len())
        );

        Ok(descriptor)
    }
}

fn take_string(request: &mut Map<String, Value>, field: &str) -> Result<Option<String>> {
    match request.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(GatewayError::ParseError(format!(
            "'{}' must be a string",
            field
        ))),
    }
}

fn take_object(
    request: &mut Map<String, Value>,
    field: &str,
) -> Result<Option<Map<String, Value>>> {
    match request.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(GatewayError::ParseError(format!(
            "'{}' must be an object",
            field
        ))),
    }
}
