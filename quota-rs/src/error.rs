//! Error types for quota-rs

use thiserror::Error;

/// Result type alias for quota operations
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Quota error types
#[derive(Error, Debug)]
pub enum QuotaError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Durable key-value store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend-of-record error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}
