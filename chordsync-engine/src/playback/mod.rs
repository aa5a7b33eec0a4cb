//! Playback backend abstraction
//!
//! [`AudioEngine`] exposes one playback contract over either the decode-graph
//! backend or the media-element fallback, chosen once from the platform's
//! [`AudioCapabilities`].

pub mod backend;
pub mod decoder;
pub mod engine;
pub mod events;
pub mod headless;
pub mod types;
pub mod visualization;

pub use backend::{AudioCapabilities, AudioFetcher, Backend, GraphOutput, GraphPlatform, MediaElement};
pub use decoder::DecodedAudio;
pub use engine::{spawn_time_updates, AudioEngine};
pub use events::PlaybackEvent;
pub use headless::{FileFetcher, MemoryFetcher, SilentOutput};
pub use types::{
    BackendKind, EngineState, PlatformError, PlatformErrorKind, PlaybackStatus, VisualizationData,
};
