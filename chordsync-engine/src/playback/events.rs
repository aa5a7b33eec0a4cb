//! Playback engine events
//!
//! Emitted by [`AudioEngine`](super::AudioEngine) on its event bus. The
//! time-update event is the one driven by the 100 ms poll; the rest follow
//! state-mutating calls.

use chordsync_common::events::NamedEvent;
use chordsync_common::timeline::AudioSource;
use serde::{Deserialize, Serialize};

use super::types::PlaybackStatus;
use crate::error::PlaybackError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// Status transition
    StateChange {
        old_status: PlaybackStatus,
        new_status: PlaybackStatus,
    },

    /// Periodic position update while playing
    TimeUpdate {
        current_time: f64,
        duration: f64,
        /// 0.0–1.0
        progress: f64,
    },

    /// A different track became current
    TrackChange { track: AudioSource },

    /// Typed error (also stored in `EngineState::error`)
    Error { error: PlaybackError },

    /// Track loaded and ready to play
    Loaded { track_id: String, duration: f64 },

    /// Playback reached the end of the track
    Ended { track_id: Option<String> },

    VolumeChange { volume: f32, muted: bool },

    RateChange { rate: f64 },
}

impl NamedEvent for PlaybackEvent {
    fn event_name(&self) -> &'static str {
        match self {
            PlaybackEvent::StateChange { .. } => "statechange",
            PlaybackEvent::TimeUpdate { .. } => "timeupdate",
            PlaybackEvent::TrackChange { .. } => "trackchange",
            PlaybackEvent::Error { .. } => "error",
            PlaybackEvent::Loaded { .. } => "loaded",
            PlaybackEvent::Ended { .. } => "ended",
            PlaybackEvent::VolumeChange { .. } => "volumechange",
            PlaybackEvent::RateChange { .. } => "ratechange",
        }
    }
}
