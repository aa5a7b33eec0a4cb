//! Playback types shared across modules

use chordsync_common::timeline::AudioSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{PlaybackError, PlaybackErrorCode};

/// Playback status of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// No track loaded
    #[default]
    Idle,
    /// Track fetch/decode in progress
    Loading,
    /// Track loaded, not started
    Ready,
    Playing,
    Paused,
    /// Stopped and rewound to 0
    Stopped,
    /// Reached the end of the track
    Ended,
    /// Last load failed (or no backend at all)
    Error,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Ready => "ready",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Ended => "ended",
            PlaybackStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Which backend variant was selected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Decode-graph backend (full decode, clock-derived position, visualization)
    Graph,
    /// Media-element fallback backend
    Element,
    /// No backend available (fatal)
    None,
}

/// Snapshot of engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub status: PlaybackStatus,
    /// Seconds
    pub current_time: f64,
    /// Seconds (0 until a track is loaded)
    pub duration: f64,
    /// 0.0–1.0
    pub volume: f32,
    pub muted: bool,
    /// 0.5–2.0
    pub playback_rate: f64,
    pub current_track: Option<AudioSource>,
    pub backend: BackendKind,
    pub using_fallback: bool,
    pub error: Option<PlaybackError>,
}

impl EngineState {
    pub fn new(backend: BackendKind, volume: f32, playback_rate: f64) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current_time: 0.0,
            duration: 0.0,
            volume,
            muted: false,
            playback_rate,
            current_track: None,
            backend,
            using_fallback: backend == BackendKind::Element,
            error: None,
        }
    }

    /// Fraction of the track played (0.0 when duration is unknown)
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Failure category reported by a platform adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// Fetch failed or connection dropped
    Network,
    /// Bytes could not be decoded
    Decode,
    /// Source format not playable by this platform
    NotSupported,
    /// Autoplay policy or device permission refused
    NotAllowed,
    /// Operation aborted (e.g. load interrupted by another load)
    Aborted,
    /// Output device held by another process
    DeviceBusy,
    /// Storage or memory quota exceeded
    QuotaExceeded,
    /// Output starved of data
    Underrun,
    Other,
}

/// Raw error from a platform adapter
///
/// Never surfaces from the engine's public API; the engine converts it to a
/// [`PlaybackError`] at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Stable error code for this platform failure
    pub fn code(&self) -> PlaybackErrorCode {
        match self.kind {
            PlatformErrorKind::Network => PlaybackErrorCode::NetworkError,
            PlatformErrorKind::Decode => PlaybackErrorCode::DecodeError,
            PlatformErrorKind::NotSupported => PlaybackErrorCode::InvalidSource,
            PlatformErrorKind::NotAllowed => PlaybackErrorCode::PermissionDenied,
            PlatformErrorKind::DeviceBusy => PlaybackErrorCode::DeviceBusy,
            PlatformErrorKind::QuotaExceeded => PlaybackErrorCode::QuotaExceeded,
            PlatformErrorKind::Underrun => PlaybackErrorCode::BufferUnderrun,
            PlatformErrorKind::Aborted | PlatformErrorKind::Other => {
                PlaybackErrorCode::PlaybackFailed
            }
        }
    }
}

/// Pull-based visualization snapshot
///
/// Byte scaling follows the usual analyser conventions: time-domain
/// samples map `[-1, 1]` to `[0, 255]` with silence at 128; frequency bins
/// map `[min_db, max_db]` to `[0, 255]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationData {
    pub frequency: Vec<u8>,
    pub time_domain: Vec<u8>,
    /// Playback position the snapshot was taken at (seconds)
    pub position: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress() {
        let mut state = EngineState::new(BackendKind::Graph, 1.0, 1.0);
        assert_eq!(state.progress(), 0.0);
        state.duration = 200.0;
        state.current_time = 50.0;
        assert_eq!(state.progress(), 0.25);
    }

    #[test]
    fn test_fallback_flag_follows_backend() {
        assert!(!EngineState::new(BackendKind::Graph, 1.0, 1.0).using_fallback);
        assert!(EngineState::new(BackendKind::Element, 1.0, 1.0).using_fallback);
    }

    #[test]
    fn test_platform_error_mapping() {
        let cases = [
            (PlatformErrorKind::Network, PlaybackErrorCode::NetworkError),
            (PlatformErrorKind::Decode, PlaybackErrorCode::DecodeError),
            (PlatformErrorKind::NotSupported, PlaybackErrorCode::InvalidSource),
            (PlatformErrorKind::NotAllowed, PlaybackErrorCode::PermissionDenied),
            (PlatformErrorKind::DeviceBusy, PlaybackErrorCode::DeviceBusy),
            (PlatformErrorKind::QuotaExceeded, PlaybackErrorCode::QuotaExceeded),
            (PlatformErrorKind::Underrun, PlaybackErrorCode::BufferUnderrun),
            (PlatformErrorKind::Aborted, PlaybackErrorCode::PlaybackFailed),
        ];
        for (kind, code) in cases {
            assert_eq!(PlatformError::new(kind, "x").code(), code);
        }
    }
}
