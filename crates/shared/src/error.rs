use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Uniform error value produced for every failed operation, regardless of
/// whether the failure was an HTTP error status or a business error carried
/// in an otherwise successful reply.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_message} (status {status})")]
pub struct NormalizedError {
    pub status: u16,
    pub error_message: String,
    #[serde(default)]
    pub details: Value,
}

impl NormalizedError {
    /// Normalizes an HTTP error reply. `details` is the server-provided
    /// `details` payload when present, otherwise the entire response body.
    pub fn from_http(status: u16, status_text: impl Into<String>, body: Value) -> Self {
        let details = match body.get("details") {
            Some(details) if !details.is_null() => details.clone(),
            _ => body,
        };
        Self {
            status,
            error_message: status_text.into(),
            details,
        }
    }

    /// Detects a business error embedded in a transport-level success body.
    /// Present iff `errorMessage` is a non-empty string or non-empty object.
    pub fn from_body(body: &Value) -> Option<Self> {
        let message = match body.get("errorMessage")? {
            Value::String(message) if !message.is_empty() => message.clone(),
            Value::Object(fields) if !fields.is_empty() => {
                Value::Object(fields.clone()).to_string()
            }
            _ => return None,
        };
        let status = body
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;
        let details = match body.get("details") {
            Some(details) if !details.is_null() => details.clone(),
            _ => body.clone(),
        };
        Some(Self {
            status,
            error_message: message,
            details,
        })
    }

    /// A settled body whose shape the slice cannot apply.
    pub fn invalid_payload(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: 0,
            error_message: message.into(),
            details,
        }
    }
}
