//! # Error Handling
//!
//! One application error enum, rendered as consistent JSON error bodies by
//! the `ResponseError` impl. Handlers return [`AppResult`] and let actix do
//! the conversion.
//!
//! ## Error Categories:
//! - **Internal / ConfigError**: server-side problems (500)
//! - **BadRequest / ValidationError / Decode**: the client sent something
//!   malformed (400)
//! - **NotFound**: missing resource (404)
//! - **Permission**: a required capability was denied (403)
//! - **Transport / Generation**: an upstream dependency failed (502)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-wide error type.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// A required capability (e.g. microphone access) was denied
    Permission(String),

    /// The streaming transport failed to connect or dropped mid-call
    Transport(String),

    /// Inbound audio payload could not be decoded
    Decode(String),

    /// The evaluation generation endpoint failed
    Generation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Permission(msg) => write!(f, "Permission denied: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::Generation(msg) => write!(f, "Generation error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses:
///
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg)
            }
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg)
            }
            AppError::Permission(msg) => (StatusCode::FORBIDDEN, "permission_denied", msg),
            AppError::Transport(msg) => (StatusCode::BAD_GATEWAY, "transport_error", msg),
            AppError::Decode(msg) => (StatusCode::BAD_REQUEST, "decode_error", msg),
            AppError::Generation(msg) => (StatusCode::BAD_GATEWAY, "generation_error", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are client mistakes, not server faults.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_and_message() {
        let err = AppError::Permission("microphone access denied".to_string());
        assert_eq!(err.to_string(), "Permission denied: microphone access denied");
    }

    #[test]
    fn test_status_codes() {
        use actix_web::http::StatusCode;

        let cases = [
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Decode("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Permission("x".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Transport("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Generation("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.error_response().status(), expected);
        }
    }

    #[test]
    fn test_serde_errors_map_to_bad_request() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: AppError = parse_err.into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
