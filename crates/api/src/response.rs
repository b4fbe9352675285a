//! API response envelope.
//!
//! Success bodies are `{"data": ...}`; failures are `{"error": {code,
//! message, fields}}`, matching what `AppError::into_response` emits so
//! clients see one shape regardless of where the failure surfaced.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cmsvs_common::error::FieldErrors;
use serde::Serialize;

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// API error payload.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    /// Per-field reasons for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response.
    pub const fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(code: impl Into<String>, message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
                fields: None,
            }),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = if self.error.is_some() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_omits_error() {
        let body = serde_json::to_value(ApiResponse::ok(json!({"id": 7}))).unwrap();
        assert_eq!(body, json!({"data": {"id": 7}}));
    }

    #[test]
    fn test_error_envelope_omits_data_and_empty_fields() {
        let body =
            serde_json::to_value(ApiResponse::<()>::err("NOT_FOUND", "request 7")).unwrap();
        assert_eq!(
            body,
            json!({"error": {"code": "NOT_FOUND", "message": "request 7"}})
        );
    }
}
