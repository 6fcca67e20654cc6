//! Error types for Lodestar
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Retry and caller-fault classification
//! - Error codes for client handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidArgument,

    // Lifecycle errors (2xxx)
    NotReady,
    Cancelled,

    // Backend errors (3xxx)
    BackendUnavailable,
    BackendDegraded,
    BackendTimeout,
    IndexLoadError,

    // Database errors (7xxx)
    DatabaseError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidArgument => 1001,

            ErrorCode::NotReady => 2001,
            ErrorCode::Cancelled => 2002,

            ErrorCode::BackendUnavailable => 3001,
            ErrorCode::BackendDegraded => 3002,
            ErrorCode::BackendTimeout => 3003,
            ErrorCode::IndexLoadError => 3004,

            ErrorCode::DatabaseError => 7001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>
    },

    // Lifecycle errors
    #[error("Retriever not ready (state: {state})")]
    NotReady { state: String },

    #[error("Search cancelled")]
    Cancelled,

    // Backend errors
    #[error("Backend unavailable: {backend}: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("Backend degraded: {backend}: {message}")]
    BackendDegraded { backend: String, message: String },

    #[error("Backend {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Failed to load index from {path}: {message}")]
    IndexLoad { path: String, message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for an invalid query argument
    pub fn invalid_argument(field: &str, message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            AppError::NotReady { .. } => ErrorCode::NotReady,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::BackendDegraded { .. } => ErrorCode::BackendDegraded,
            AppError::Timeout { .. } => ErrorCode::BackendTimeout,
            AppError::IndexLoad { .. } => ErrorCode::IndexLoadError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Io(_) => ErrorCode::InternalError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Errors caused by the caller's input; never worth retrying
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidArgument { .. })
    }

    /// Transient failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::BackendDegraded { .. }
                | AppError::Timeout { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::HttpClient(_)
                | AppError::Database(_)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string()
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Lowest field name, independent of map order
        let field = errors.field_errors().keys().min().map(|f| f.to_string());
        AppError::InvalidArgument {
            message: errors.to_string(),
            field,
        }
    }
}
