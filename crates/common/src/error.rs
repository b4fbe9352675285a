//! Error types for cmsvs-rs.

use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Per-field validation failures, keyed by field name.
pub type FieldErrors = BTreeMap<String, String>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {}", format_fields(.0))]
    Validation(FieldErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Identifier space exhausted: {0}")]
    IdentifierExhausted(String),

    // === Server Errors ===
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

fn format_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// Build a validation error for a single field.
    #[must_use]
    pub fn validation(field: &str, reason: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), reason.to_string());
        Self::Validation(fields)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::InvalidTransition(_) | Self::IdentifierExhausted(_) => {
                StatusCode::CONFLICT
            }

            // 5xx Server Errors
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Cache(_) | Self::Queue(_) | Self::Config(_)
            | Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::IdentifierExhausted(_) => "IDENTIFIER_EXHAUSTED",
            Self::Transient(_) => "TRANSIENT_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Fatal(_) => "FATAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns whether the caller may retry the failed operation.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Log server errors
        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let fields = match &self {
            Self::Validation(fields) => Some(fields.clone()),
            _ => None,
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
                "fields": fields,
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errors) in err.field_errors() {
            let reason = errors
                .first()
                .and_then(|e| e.message.as_ref())
                .map_or_else(|| "invalid value".to_string(), ToString::to_string);
            fields.insert(field.to_string(), reason);
        }
        Self::Validation(fields)
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        use sea_orm::DbErr;
        match &err {
            DbErr::RecordNotFound(what) => Self::NotFound(what.clone()),
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => Self::Transient(err.to_string()),
            DbErr::Exec(_) | DbErr::Query(_) => {
                let msg = err.to_string();
                if msg.contains("duplicate key") || msg.contains("unique constraint") {
                    Self::Conflict(msg)
                } else {
                    Self::Database(msg)
                }
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Fatal(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("request 7".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::validation("personal_number", "must be 9 digits").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidTransition("completed -> pending".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Transient("db pool exhausted".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Fatal("corrupt state".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_message_lists_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("personal_number".into(), "must match ^[0-9]{9}$".into());
        fields.insert("full_name".into(), "required".into());
        let err = AppError::Validation(fields);
        let msg = err.to_string();
        assert!(msg.contains("personal_number: must match"));
        assert!(msg.contains("full_name: required"));
    }

    #[test]
    fn test_db_err_unique_violation_maps_to_conflict() {
        let err = sea_orm::DbErr::Query(sea_orm::RuntimeErr::Internal(
            "duplicate key value violates unique constraint \"idx_request_number\"".into(),
        ));
        assert!(matches!(AppError::from(err), AppError::Conflict(_)));
    }

    #[test]
    fn test_only_transient_is_retriable() {
        assert!(AppError::Transient("gateway 503".into()).is_retriable());
        assert!(!AppError::Database("syntax error".into()).is_retriable());
        assert!(!AppError::Conflict("duplicate".into()).is_retriable());
    }
}
