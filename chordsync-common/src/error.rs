//! Common error types for chordsync

use thiserror::Error;

/// Common result type for chordsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by all chordsync crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeline failed validation
    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),
}
