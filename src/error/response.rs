use serde::{Deserialize, Serialize};

use super::kinds::{ExportError, StorefrontError};

/// Structured error information rendered into JSON.
///
/// Used both for HTTP error bodies and for the in-band marker line that
/// terminates a line-delimited export.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    /// Identity key of the last row delivered before the failure
    #[serde(rename = "lastId", skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
}

/// Wrapper that nests [`ErrorInfo`] under an `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Build an error body from a top-level error
    pub fn from_error(err: &StorefrontError) -> Self {
        Self {
            error: ErrorInfo {
                code: err.code().to_string(),
                message: err.to_string(),
                last_id: None,
            },
        }
    }

    /// Build a stream marker from an export error
    ///
    /// # Arguments
    /// * `err` - Error that terminated the stream
    /// * `last_id` - Identity key of the last row written, if any
    pub fn marker(err: &ExportError, last_id: Option<i64>) -> Self {
        Self {
            error: ErrorInfo {
                code: err.code().to_string(),
                message: err.to_string(),
                last_id,
            },
        }
    }

    /// Convert to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
