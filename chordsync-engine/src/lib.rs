//! # chordsync engine
//!
//! Audio synchronization and playback core of a song/chord editor.
//!
//! **Components:**
//! - [`playback`]: dual-backend audio engine (decode graph or media element)
//! - [`sync`]: timeline store and position-to-chord resolver
//! - [`scroll`]: auto-scroll controller with manual override detection
//! - [`practice`]: look-ahead metronome and practice session coordinator
//! - [`app`]: composition root wiring the above together
//!
//! Each component publishes its own typed event enum on an
//! [`EventBus`](chordsync_common::EventBus).

pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod playback;
pub mod practice;
pub mod scroll;
pub mod sync;

pub use app::{AppParts, ChordLayout, ChordSyncApp, LinearLayout};
pub use clock::{AudioClock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{Error, PlaybackError, PlaybackErrorCode, Result, SyncError, SyncErrorCode};
