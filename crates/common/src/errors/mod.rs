//! Error types for CardForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses with optional details
//! - Error codes for client handling

use crate::llm::LlmError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    ValidationError,

    // Authentication errors
    Unauthorized,
    InvalidToken,
    ExpiredToken,
    AuthRejected,

    // Authorization errors
    Forbidden,

    // Resource errors
    NotFound,

    // Rate limiting
    RateLimited,

    // Database errors
    PersistenceError,
    ConnectionError,

    // External service errors
    UpstreamError,
    GenerationTimeout,
    AuthProviderError,

    // Internal errors
    InternalError,
    ConfigurationError,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("{message}")]
    Validation {
        message: String,
        /// Field name -> messages
        details: Option<serde_json::Value>,
    },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid access token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    /// The auth provider refused the request (bad signup, failed logout)
    #[error("{message}")]
    AuthRejected { message: String },

    // Authorization errors
    #[error("{message}")]
    Forbidden { message: String },

    // Resource errors
    #[error("{resource_type} with ID {id} not found")]
    NotFound { resource_type: String, id: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database operation failed")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("{message}")]
    Persistence { message: String, details: String },

    // External service errors
    #[error("{0}")]
    Upstream(#[from] LlmError),

    #[error("Generation timed out after {timeout_ms}ms")]
    GenerationTimeout { timeout_ms: u64 },

    #[error("Auth provider error: {message}")]
    AuthProvider { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Shorthand for a validation failure with per-field messages
    pub fn validation(message: impl Into<String>, field: &str, reason: impl Into<String>) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert(field.to_string(), serde_json::json!([reason.into()]));
        AppError::Validation {
            message: message.into(),
            details: Some(serde_json::Value::Object(fields)),
        }
    }

    /// Connection-level store failure with the connection parameters
    /// redacted; the raw error only goes to the log
    pub fn database_connection(context: &str, err: &sea_orm::DbErr) -> Self {
        tracing::warn!(error = %err, "{}", context);
        AppError::DatabaseConnection {
            message: format!("{}: {}", context, redact_db_error(err)),
        }
    }

    /// Shorthand for a missing resource
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        AppError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::AuthRejected { .. } => ErrorCode::AuthRejected,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) | AppError::Persistence { .. } => ErrorCode::PersistenceError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Upstream(_) => ErrorCode::UpstreamError,
            AppError::GenerationTimeout { .. } => ErrorCode::GenerationTimeout,
            AppError::AuthProvider { .. } => ErrorCode::AuthProviderError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::AuthRejected { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 504 Gateway Timeout
            AppError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Persistence { .. }
            | AppError::Upstream(_)
            | AppError::AuthProvider { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details attached to the response body, if any.
    ///
    /// Store errors expose the underlying message but never connection
    /// parameters.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { details, .. } => details.clone(),
            AppError::Persistence { details, .. } => Some(serde_json::Value::String(details.clone())),
            AppError::Database(err) => Some(serde_json::Value::String(redact_db_error(err))),
            _ => None,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

fn redact_db_error(err: &sea_orm::DbErr) -> String {
    match err {
        sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
            "database connection unavailable".to_string()
        }
        other => other.to_string(),
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let details = self.details();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: message,
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}
