//! # Error Handling
//!
//! Custom error type shared by the HTTP handlers, the call lifecycle and the
//! relay transports, plus its mapping to HTTP responses.
//!
//! ## Error Categories:
//! - **Request errors**: `BadRequest`, `ValidationError`, `NotFound`
//! - **Server errors**: `Internal`, `ConfigError`
//! - **Call errors**: `UpstreamUnavailable` (the voice service refused, dropped
//!   or never answered), `AnalysisFailed` (post-call scoring failed),
//!   `CapacityExceeded` (too many concurrent calls)
//!
//! ## Why one enum:
//! The same error travels from a transport all the way to the client. A call
//! that fails mid-session reports `to_string()` on the WebSocket; a call that
//! fails over REST becomes a JSON error body via `ResponseError`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::NotFound("Call not found".to_string()));
/// ```
#[derive(Debug, Clone)]
pub enum AppError {
    /// Internal server errors (lock poisoning, serialization bugs, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested call, persona or script was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Input failed validation rules (e.g. a persona without a name)
    ValidationError(String),

    /// The upstream voice service could not be reached or dropped the stream
    UpstreamUnavailable(String),

    /// The post-call analysis service failed or returned garbage
    AnalysisFailed(String),

    /// The server is already running its maximum number of calls
    CapacityExceeded(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            AppError::AnalysisFailed(msg) => write!(f, "Analysis failed: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - UpstreamUnavailable/AnalysisFailed → 502 (a collaborator failed us)
/// - CapacityExceeded → 503
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Call 42 not found",
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
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::UpstreamUnavailable(msg) => (StatusCode::BAD_GATEWAY, "upstream_unavailable", msg),
            AppError::AnalysisFailed(msg) => (StatusCode::BAD_GATEWAY, "analysis_failed", msg),
            AppError::CapacityExceeded(msg) => (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded", msg),
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

/// `anyhow` errors from application-edge code become internal errors.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON errors are almost always the client's fault.
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

/// Seed files are configuration, so a broken one is a configuration error.
impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::ConfigError(format!("Invalid seed file: {}", err))
    }
}

/// Every transport failure on the upstream socket collapses into a single
/// "upstream unavailable" condition. Nothing above the connector retries.
impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::AnalysisFailed(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
