//! Error types for stave-core

use thiserror::Error;

/// Result type alias using stave-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stave-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store rejected an operation
    #[error("Remote error: {0}")]
    Remote(String),

    /// A sync cycle was attempted without an authentication session
    #[error("No authentication session")]
    NoSession,
}
