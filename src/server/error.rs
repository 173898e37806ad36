//! HTTP rendering of errors

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::{
    AdmissionError, ErrorInfo, ErrorResponse, ExportError, StoreError, StorefrontError,
};

/// Error returned by a handler before any body byte was sent
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
    retry_after: Option<u64>,
}

impl ApiError {
    /// 400 for a malformed query string
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: ErrorInfo {
                    code: "bad_request".to_string(),
                    message: message.into(),
                    last_id: None,
                },
            },
            retry_after: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.body.error.code
    }
}

fn export_status(err: &ExportError) -> StatusCode {
    match err {
        ExportError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ExportError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        ExportError::LimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExportError::SchemaNotRegistered(_)
        | ExportError::EncodeFailure { .. }
        | ExportError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StorefrontError> for ApiError {
    fn from(err: StorefrontError) -> Self {
        let (status, retry_after) = match &err {
            StorefrontError::Export(e) => (export_status(e), None),
            StorefrontError::Admission(e) => (StatusCode::TOO_MANY_REQUESTS, Some(retry_secs(e))),
            StorefrontError::Store(StoreError::Unavailable(_)) | StorefrontError::MongoDb(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        Self {
            status,
            body: ErrorResponse::from_error(&err),
            retry_after,
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        StorefrontError::Export(err).into()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        StorefrontError::Admission(err).into()
    }
}

/// Whole seconds a rejected client should wait, at least one
fn retry_secs(err: &AdmissionError) -> u64 {
    match err {
        AdmissionError::RateLimited { retry_after, .. } => {
            let secs = retry_after.as_secs();
            if retry_after.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs.max(1)
            }
        }
        AdmissionError::TooManyConcurrent { .. } => 1,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
