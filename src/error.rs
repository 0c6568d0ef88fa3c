//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`AppError`]: failures of the HTTP surface, converted into JSON responses.
//! - [`StreamError`]: failures inside the streaming core (sessions, pipeline,
//!   transport writes). These are logged and contained; they never take down
//!   another session or the process.
//!
//! ## JSON error format:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Server port cannot be 0",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Status mapping:
/// - **Internal / ConfigError** → 500
/// - **BadRequest / ValidationError** → 400
/// - **NotFound** → 404
/// - **ServiceUnavailable** → 503 (session capacity reached)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Any `anyhow` error bubbling into a handler is a server-side problem.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors come from malformed client payloads.
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

/// Registry refusals surface to the upgrading client as HTTP errors.
impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::CapacityReached(_) => AppError::ServiceUnavailable(err.to_string()),
            StreamError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Errors raised inside the streaming core.
///
/// ## Handling policy:
/// - **TransportWrite**: writing to a closed or broken connection. Logged, dropped.
/// - **Transport**: the connection itself failed (protocol violation, heartbeat
///   timeout). Forces session cleanup.
/// - **Processing**: the transcription step failed. Logged, the session keeps running.
/// - **SessionClosed / SessionNotFound**: a result arrived for a session that is
///   no longer open. The result is discarded.
/// - **DuplicateSession / CapacityReached**: registration refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    TransportWrite(String),
    Transport(String),
    Processing(String),
    SessionClosed(String),
    SessionNotFound(String),
    DuplicateSession(String),
    CapacityReached(usize),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::TransportWrite(msg) => write!(f, "Transport write failed: {}", msg),
            StreamError::Transport(msg) => write!(f, "Transport error: {}", msg),
            StreamError::Processing(msg) => write!(f, "Processing failed: {}", msg),
            StreamError::SessionClosed(id) => write!(f, "Session '{}' is closed", id),
            StreamError::SessionNotFound(id) => write!(f, "Session '{}' not found", id),
            StreamError::DuplicateSession(id) => write!(f, "Session ID '{}' already exists", id),
            StreamError::CapacityReached(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ServiceUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::ConfigError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_capacity_maps_to_service_unavailable() {
        let err: AppError = StreamError::CapacityReached(3).into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(err.to_string().contains("Maximum concurrent sessions (3)"));
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::SessionClosed("abc".to_string());
        assert_eq!(err.to_string(), "Session 'abc' is closed");
    }
}
