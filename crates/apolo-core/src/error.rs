//! Unified error handling for the charging engine
//!
//! Every engine operation returns either a success payload or one of these
//! typed failures. Transports (HTTP, Diameter) translate the kind into their
//! own status codes, never the message text.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    // ==================== Concurrency Errors ====================
    /// The guardian lock for a key could not be acquired in time.
    /// The guarded operation was never started; callers may retry.
    #[error("Lock timeout on key {key} after {timeout_ms}ms")]
    LockTimeout { key: String, timeout_ms: u64 },

    // ==================== Protocol Errors ====================
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid request sequence: {0}")]
    InvalidRequestSequence(String),

    #[error("Out of order request for session {session_id}: last {last}, received {received}")]
    OutOfOrderRequest {
        session_id: String,
        last: u32,
        received: u32,
    },

    // ==================== Session Errors ====================
    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Session not managed here: {0}")]
    NotManaged(String),

    // ==================== Rating Errors ====================
    #[error("Rating unavailable: {0}")]
    RatingUnavailable(String),

    #[error("Insufficient credit: {0}")]
    InsufficientCredit(String),

    #[error("LCR compute error: {0}")]
    LcrCompute(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::MalformedMessage(_)
            | AppError::InvalidRequestSequence(_)
            | AppError::Validation(_)
            | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientCredit(_) => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::NotManaged(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::OutOfOrderRequest { .. } | AppError::SessionClosed(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::RatingUnavailable(_) | AppError::LcrCompute(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::LockTimeout { .. } => "lock_timeout",
            AppError::MalformedMessage(_) => "malformed_message",
            AppError::InvalidRequestSequence(_) => "invalid_request_sequence",
            AppError::OutOfOrderRequest { .. } => "out_of_order_request",
            AppError::SessionClosed(_) => "session_closed",
            AppError::NotManaged(_) => "not_managed",
            AppError::RatingUnavailable(_) => "rating_unavailable",
            AppError::InsufficientCredit(_) => "insufficient_credit",
            AppError::LcrCompute(_) => "lcr_compute_error",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Only lock timeouts leave no trace behind and can be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::LockTimeout { .. })
    }

    /// Errors that must stop a running debit loop and close the session
    pub fn is_rating_failure(&self) -> bool {
        matches!(
            self,
            AppError::RatingUnavailable(_) | AppError::InsufficientCredit(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
