//! Error types for chordsync-engine
//!
//! Two typed taxonomies cross the public boundary:
//! - [`PlaybackError`] with a stable [`PlaybackErrorCode`]
//! - [`SyncError`] with a stable [`SyncErrorCode`]
//!
//! Both carry a human message, an optional original-cause string, the time
//! the error was raised and a `recoverable` flag. Platform failures are
//! converted into these at the boundary where they occur; raw platform
//! errors never leave the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable playback error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackErrorCode {
    NetworkError,
    DecodeError,
    NotSupported,
    PlaybackFailed,
    PermissionDenied,
    InvalidSource,
    BufferUnderrun,
    DeviceBusy,
    QuotaExceeded,
    CrossfadeFailed,
}

impl PlaybackErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackErrorCode::NetworkError => "NETWORK_ERROR",
            PlaybackErrorCode::DecodeError => "DECODE_ERROR",
            PlaybackErrorCode::NotSupported => "NOT_SUPPORTED",
            PlaybackErrorCode::PlaybackFailed => "PLAYBACK_FAILED",
            PlaybackErrorCode::PermissionDenied => "PERMISSION_DENIED",
            PlaybackErrorCode::InvalidSource => "INVALID_SOURCE",
            PlaybackErrorCode::BufferUnderrun => "BUFFER_UNDERRUN",
            PlaybackErrorCode::DeviceBusy => "DEVICE_BUSY",
            PlaybackErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            PlaybackErrorCode::CrossfadeFailed => "CROSSFADE_FAILED",
        }
    }

    /// Only the absence of any audio backend is fatal
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PlaybackErrorCode::NotSupported)
    }
}

impl fmt::Display for PlaybackErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed playback error stored in `EngineState::error` and emitted on the bus
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct PlaybackError {
    pub code: PlaybackErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

impl PlaybackError {
    pub fn new(code: PlaybackErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            timestamp: Utc::now(),
            recoverable: code.is_recoverable(),
        }
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn not_supported() -> Self {
        Self::new(
            PlaybackErrorCode::NotSupported,
            "No audio playback backend is available on this platform",
        )
    }
}

/// Stable synchronization error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorCode {
    #[serde(rename = "SYNC_TIMELINE_INVALID")]
    TimelineInvalid,
    #[serde(rename = "SYNC_ANNOTATION_FAILED")]
    AnnotationFailed,
    #[serde(rename = "SYNC_ANALYSIS_FAILED")]
    AnalysisFailed,
    #[serde(rename = "SYNC_IMPORT_FAILED")]
    ImportFailed,
}

impl SyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::TimelineInvalid => "SYNC_TIMELINE_INVALID",
            SyncErrorCode::AnnotationFailed => "SYNC_ANNOTATION_FAILED",
            SyncErrorCode::AnalysisFailed => "SYNC_ANALYSIS_FAILED",
            SyncErrorCode::ImportFailed => "SYNC_IMPORT_FAILED",
        }
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed synchronization error
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub code: SyncErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

impl SyncError {
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            timestamp: Utc::now(),
            recoverable: true,
        }
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// Main error type for chordsync-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Playback backend errors
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Synchronization / timeline errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Shared library errors (config, timeline parsing)
    #[error(transparent)]
    Common(#[from] chordsync_common::Error),

    /// Practice data store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using chordsync-engine Error
pub type Result<T> = std::result::Result<T, Error>;
