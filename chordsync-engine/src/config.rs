//! Engine configuration
//!
//! One TOML file, every section optional:
//!
//! ```toml
//! [playback]
//! time_update_interval_ms = 100
//!
//! [sync]
//! tolerance_ms = 50.0
//! practice_mode = true
//!
//! [scroll]
//! behavior = "smooth"
//!
//! [metronome]
//! bpm = 96
//!
//! [practice]
//! timing_tolerance_ms = 100.0
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! # Resolution order
//!
//! 1. `--config` command-line argument
//! 2. `CHORDSYNC_CONFIG` environment variable
//! 3. `chordsync/config.toml` in the platform config directory
//! 4. Built-in defaults
//!
//! A missing file is logged and defaults are used; a malformed file is an
//! error.

use chordsync_common::config::{default_data_dir, load_toml_or_default, resolve_config_path, CONFIG_ENV_VAR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::practice::MetronomeSettings;
use crate::scroll::AutoScrollConfig;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub playback: PlaybackConfig,
    pub sync: SyncConfig,
    pub scroll: AutoScrollConfig,
    pub metronome: MetronomeConfig,
    pub practice: PracticeConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Resolve and load the config file (see module docs for order)
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        Ok(load_toml_or_default(path.as_deref())?)
    }

    /// Parse a TOML document directly
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

/// Playback backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Time-update poll interval while playing
    pub time_update_interval_ms: u64,
    /// 0.0–1.0
    pub initial_volume: f32,
    /// 0.5–2.0
    pub initial_rate: f64,
    /// Use the media-element backend even when the graph backend exists
    pub prefer_fallback: bool,
    pub event_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            time_update_interval_ms: 100,
            initial_volume: 1.0,
            initial_rate: 1.0,
            prefer_fallback: false,
            event_capacity: 256,
        }
    }
}

impl PlaybackConfig {
    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms.max(1))
    }
}

/// Synchronization engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Chord/marker matching tolerance in milliseconds
    pub tolerance_ms: f64,
    /// Enables loop-section handling
    pub practice_mode: bool,
    /// Fire each marker once per entry into its window instead of every tick
    pub edge_triggered_markers: bool,
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 50.0,
            practice_mode: false,
            edge_triggered_markers: false,
            event_capacity: 256,
        }
    }
}

/// Metronome settings plus scheduler timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    #[serde(flatten)]
    pub settings: MetronomeSettings,
    /// How far ahead of the clock beats are scheduled (seconds)
    pub lookahead_secs: f64,
    /// Re-arm interval of the scheduler
    pub schedule_interval_ms: u64,
    /// Sample rate tones are rendered at
    pub sample_rate: u32,
    pub event_capacity: usize,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            settings: MetronomeSettings::default(),
            lookahead_secs: 0.1,
            schedule_interval_ms: 100,
            sample_rate: 44_100,
            event_capacity: 256,
        }
    }
}

impl MetronomeConfig {
    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms.max(1))
    }
}

/// Practice coordination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    /// Timing-feedback tolerance in milliseconds
    pub timing_tolerance_ms: f64,
    /// Directory of the JSON progress store (platform data dir when unset)
    pub store_dir: Option<PathBuf>,
    pub event_capacity: usize,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            timing_tolerance_ms: 100.0,
            store_dir: None,
            event_capacity: 256,
        }
    }
}

impl PracticeConfig {
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
