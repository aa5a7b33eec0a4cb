//! Audio playback engine
//!
//! Owns the selected [`Backend`], the observable [`EngineState`], and the
//! playback event bus. Every fallible platform call funnels through
//! [`AudioEngine::handle_error`], so callers only ever see typed
//! [`PlaybackError`]s and `state.error` always reflects the last failure.
//!
//! The engine itself is synchronous apart from `load_track` and `play`.
//! Position updates come from [`spawn_time_updates`], which calls
//! [`AudioEngine::tick`] on a fixed interval while the host holds the
//! engine behind a `tokio::sync::Mutex`.

use chordsync_common::events::EventBus;
use chordsync_common::timeline::AudioSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::{AudioCapabilities, Backend};
use super::events::PlaybackEvent;
use super::types::{BackendKind, EngineState, PlatformError, PlaybackStatus, VisualizationData};
use crate::clock::AudioClock;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, PlaybackErrorCode};
use crate::sync::SyncEngine;

pub const MIN_PLAYBACK_RATE: f64 = 0.5;
pub const MAX_PLAYBACK_RATE: f64 = 2.0;

pub struct AudioEngine {
    backend: Option<Backend>,
    state: EngineState,
    events: EventBus<PlaybackEvent>,
    sync: Option<Arc<Mutex<SyncEngine>>>,
    destroyed: bool,
}

impl AudioEngine {
    /// Build the engine and select a backend
    ///
    /// With no usable backend the engine starts in the permanent
    /// `NOT_SUPPORTED` error state and rejects every playback call.
    pub fn new(
        capabilities: AudioCapabilities,
        clock: Arc<dyn AudioClock>,
        config: &PlaybackConfig,
    ) -> Self {
        let backend = Backend::select(capabilities, clock, config.prefer_fallback);
        let kind = backend.as_ref().map_or(BackendKind::None, |b| b.kind());

        let mut state = EngineState::new(
            kind,
            config.initial_volume.clamp(0.0, 1.0),
            config.initial_rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE),
        );

        if backend.is_none() {
            error!("No audio backend available; playback disabled");
            state.status = PlaybackStatus::Error;
            state.error = Some(PlaybackError::not_supported());
        } else if state.using_fallback {
            info!("Using media-element fallback backend");
        }

        Self {
            backend,
            state,
            events: EventBus::new(config.event_capacity),
            sync: None,
            destroyed: false,
        }
    }

    /// Forward every position update to a synchronization engine
    pub fn attach_sync(&mut self, sync: Arc<Mutex<SyncEngine>>) {
        self.sync = Some(sync);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Reset `state.error` without touching playback state
    pub fn clear_error(&mut self) {
        self.state.error = None;
    }

    /// Record, emit and log a playback error; returns it for `Err(..)`
    fn handle_error(&mut self, err: PlaybackError) -> PlaybackError {
        if err.recoverable {
            warn!(code = %err.code, "Playback error: {}", err.message);
        } else {
            error!(code = %err.code, "Fatal playback error: {}", err.message);
        }
        self.state.error = Some(err.clone());
        self.events.emit_lossy(PlaybackEvent::Error { error: err.clone() });
        err
    }

    fn platform_error(&mut self, context: &str, err: PlatformError) -> PlaybackError {
        let typed = PlaybackError::new(err.code(), format!("{} failed", context)).with_cause(&err);
        self.handle_error(typed)
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        let old_status = self.state.status;
        if old_status != status {
            self.state.status = status;
            debug!("Playback status {} -> {}", old_status, status);
            self.events.emit_lossy(PlaybackEvent::StateChange {
                old_status,
                new_status: status,
            });
        }
    }

    fn backend_mut(&mut self) -> Result<&mut Backend, PlaybackError> {
        if self.destroyed {
            return Err(PlaybackError::new(
                PlaybackErrorCode::PlaybackFailed,
                "Audio engine has been destroyed",
            ));
        }
        self.backend.as_mut().ok_or_else(PlaybackError::not_supported)
    }

    fn ensure_track(&mut self) -> Result<(), PlaybackError> {
        if self.state.current_track.is_none() {
            let err = PlaybackError::new(PlaybackErrorCode::InvalidSource, "No track loaded");
            return Err(self.handle_error(err));
        }
        Ok(())
    }

    fn forward_to_sync(&self, position: f64) {
        if let Some(sync) = &self.sync {
            sync.lock()
                .unwrap_or_else(|e| e.into_inner())
                .update_position(position);
        }
    }

    fn emit_time_update(&self) {
        self.events.emit_lossy(PlaybackEvent::TimeUpdate {
            current_time: self.state.current_time,
            duration: self.state.duration,
            progress: self.state.progress(),
        });
    }

    /// Fetch, decode and prepare a track
    ///
    /// # Errors
    /// `INVALID_SOURCE` for a source without a URL; otherwise the mapped
    /// platform failure. The status becomes `error` on failure.
    pub async fn load_track(&mut self, source: AudioSource) -> Result<(), PlaybackError> {
        self.backend_mut()?;

        if source.url.trim().is_empty() {
            let err = PlaybackError::new(
                PlaybackErrorCode::InvalidSource,
                format!("Audio source {} has no URL", source.id),
            );
            return Err(self.handle_error(err));
        }

        info!("Loading track {} ({})", source.id, source.url);
        self.set_status(PlaybackStatus::Loading);

        let result = self.backend_mut()?.load(&source).await;
        let duration = match result {
            Ok(duration) => duration,
            Err(e) => {
                self.state.current_track = None;
                self.state.current_time = 0.0;
                self.state.duration = 0.0;
                self.set_status(PlaybackStatus::Error);
                return Err(self.platform_error("Track load", e));
            }
        };

        let (volume, muted, rate) = (self.state.volume, self.state.muted, self.state.playback_rate);
        let backend = self.backend_mut()?;
        backend.set_output_volume(volume, muted);
        backend.set_rate(rate);

        self.state.duration = if duration > 0.0 { duration } else { source.duration };
        self.state.current_time = 0.0;
        self.state.current_track = Some(source.clone());

        info!("Loaded track {} ({:.2}s)", source.id, self.state.duration);
        self.events.emit_lossy(PlaybackEvent::TrackChange {
            track: source.clone(),
        });
        self.events.emit_lossy(PlaybackEvent::Loaded {
            track_id: source.id,
            duration: self.state.duration,
        });
        self.set_status(PlaybackStatus::Ready);
        Ok(())
    }

    /// Start or resume playback
    ///
    /// Playing an ended track restarts it from 0.
    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        self.backend_mut()?;
        self.ensure_track()?;

        match self.state.status {
            PlaybackStatus::Playing => return Ok(()),
            PlaybackStatus::Ended => {
                if let Err(e) = self.backend_mut()?.seek(0.0) {
                    return Err(self.platform_error("Restart", e));
                }
                self.state.current_time = 0.0;
            }
            _ => {}
        }

        let result = self.backend_mut()?.play().await;
        if let Err(e) = result {
            return Err(self.platform_error("Play", e));
        }
        self.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        self.backend_mut()?;
        if self.state.status != PlaybackStatus::Playing {
            return Ok(());
        }
        let backend = self.backend_mut()?;
        backend.pause();
        let position = backend.position();
        self.state.current_time = position;
        self.set_status(PlaybackStatus::Paused);
        Ok(())
    }

    /// Halt playback and rewind to 0
    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        self.backend_mut()?.stop();
        if self.state.current_track.is_some() {
            self.state.current_time = 0.0;
            self.set_status(PlaybackStatus::Stopped);
        }
        Ok(())
    }

    /// Move the playhead, clamped to `[0, duration]`
    ///
    /// The clamped position is forwarded to the synchronization engine
    /// immediately so chord state does not wait for the next tick.
    pub fn seek(&mut self, time: f64) -> Result<(), PlaybackError> {
        let duration = self.state.duration;
        let target = if time.is_nan() { 0.0 } else { time.clamp(0.0, duration) };

        if let Err(e) = self.backend_mut()?.seek(target) {
            return Err(self.platform_error("Seek", e));
        }
        self.state.current_time = target;
        if self.state.status == PlaybackStatus::Ended {
            self.set_status(PlaybackStatus::Paused);
        }

        debug!("Seek to {:.3}s", target);
        self.forward_to_sync(target);
        self.emit_time_update();
        Ok(())
    }

    /// Set volume, clamped to `[0, 1]`
    pub fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError> {
        let volume = if volume.is_nan() { self.state.volume } else { volume.clamp(0.0, 1.0) };
        let muted = self.state.muted;
        self.backend_mut()?.set_output_volume(volume, muted);
        self.state.volume = volume;
        self.events.emit_lossy(PlaybackEvent::VolumeChange { volume, muted });
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), PlaybackError> {
        let volume = self.state.volume;
        self.backend_mut()?.set_output_volume(volume, muted);
        self.state.muted = muted;
        self.events.emit_lossy(PlaybackEvent::VolumeChange { volume, muted });
        Ok(())
    }

    /// Set playback rate, clamped to `[0.5, 2.0]`
    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
        let rate = if rate.is_nan() {
            self.state.playback_rate
        } else {
            rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
        };
        self.backend_mut()?.set_rate(rate);
        self.state.playback_rate = rate;
        self.events.emit_lossy(PlaybackEvent::RateChange { rate });
        Ok(())
    }

    /// One time-update poll
    ///
    /// Only acts while playing. Returns the position fed to the
    /// synchronization engine.
    pub fn tick(&mut self) -> Option<f64> {
        if self.destroyed || self.state.status != PlaybackStatus::Playing {
            return None;
        }
        let backend = self.backend.as_mut()?;
        let position = backend.position();
        let ended = backend.ended();
        if ended {
            backend.pause();
        }

        self.state.current_time = position;
        self.forward_to_sync(position);
        self.emit_time_update();

        if ended {
            info!("Track ended at {:.2}s", position);
            self.set_status(PlaybackStatus::Ended);
            self.events.emit_lossy(PlaybackEvent::Ended {
                track_id: self.state.current_track.as_ref().map(|t| t.id.clone()),
            });
        }
        Some(position)
    }

    /// Analyser snapshot; `None` on the fallback backend or with no track
    pub fn visualization(&self) -> Option<VisualizationData> {
        self.backend.as_ref()?.visualization()
    }

    /// Stop playback and release the backend. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.stop();
        }
        self.backend = None;
        self.sync = None;
        self.destroyed = true;
        self.state.current_track = None;
        self.state.current_time = 0.0;
        self.state.duration = 0.0;
        self.set_status(PlaybackStatus::Idle);
        info!("Audio engine destroyed");
    }
}

/// Spawn the time-update driver
///
/// Ticks every `interval` until the engine is destroyed. Missed ticks are
/// skipped rather than bunched up.
pub fn spawn_time_updates(
    engine: Arc<tokio::sync::Mutex<AudioEngine>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut engine = engine.lock().await;
            if engine.is_destroyed() {
                debug!("Time-update driver exiting");
                break;
            }
            engine.tick();
        }
    })
}
