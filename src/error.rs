//! PrivGuard error types

use thiserror::Error;

/// PrivGuard error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scanner error (per-file, non-fatal at the engine level)
    #[error("Scanner error: {0}")]
    Scanner(String),

    /// AI collaborator error
    #[error("AI error: {0}")]
    Ai(String),

    /// Result store error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for PrivGuard operations
pub type Result<T> = std::result::Result<T, Error>;
