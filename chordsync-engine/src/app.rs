//! Composition root
//!
//! Builds every service explicitly and wires them together:
//!
//! ```text
//! time-update driver -> AudioEngine::tick -> SyncEngine::update_position
//!                                                  |
//!                               SyncEvent bus -----+----> router task
//!                                                          |-> AutoScrollController (chord changes)
//!                                                          |-> PracticeCoordinator (all events)
//!                                                          '-> AudioEngine::seek (loop start)
//! ```
//!
//! Nothing here is global; the host owns the [`ChordSyncApp`] and calls
//! [`init`](ChordSyncApp::init) and [`destroy`](ChordSyncApp::destroy).

use chordsync_common::timeline::{AudioSource, ChordMapping, Timeline};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::AudioClock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::playback::{spawn_time_updates, AudioCapabilities, AudioEngine};
use crate::practice::{spawn_metronome, Metronome, PracticeCoordinator, ProgressStore, ToneSink};
use crate::scroll::{
    spawn_scroll_frames, AutoScrollController, ChordScrollRequest, ElementRect, ScrollSurface, SmartScrollContext,
    FRAME_INTERVAL,
};
use crate::sync::{SyncEngine, SyncEvent};

/// Where each chord is drawn on the scroll surface
pub trait ChordLayout: Send + Sync {
    fn chord_rect(&self, chord: &ChordMapping) -> Option<ElementRect>;
}

/// Chords stacked top to bottom proportionally to time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearLayout {
    pub pixels_per_second: f64,
}

impl LinearLayout {
    pub fn new(pixels_per_second: f64) -> Self {
        Self { pixels_per_second }
    }

    /// Content height needed for a song of `duration` seconds
    pub fn content_height(&self, duration: f64) -> f64 {
        duration.max(0.0) * self.pixels_per_second
    }
}

impl ChordLayout for LinearLayout {
    fn chord_rect(&self, chord: &ChordMapping) -> Option<ElementRect> {
        Some(ElementRect::new(
            chord.start_time * self.pixels_per_second,
            chord.duration() * self.pixels_per_second,
        ))
    }
}

/// Host-provided platform pieces
pub struct AppParts {
    pub capabilities: AudioCapabilities,
    pub clock: Arc<dyn AudioClock>,
    pub tone_sink: Box<dyn ToneSink>,
    pub store: Arc<dyn ProgressStore>,
    pub surface: Box<dyn ScrollSurface>,
    pub layout: Arc<dyn ChordLayout>,
}

pub struct ChordSyncApp {
    config: EngineConfig,
    audio: Arc<tokio::sync::Mutex<AudioEngine>>,
    sync: Arc<Mutex<SyncEngine>>,
    scroll: Arc<Mutex<AutoScrollController>>,
    metronome: Arc<Mutex<Metronome>>,
    practice: Arc<Mutex<PracticeCoordinator>>,
    layout: Arc<dyn ChordLayout>,
    tasks: Vec<JoinHandle<()>>,
    destroyed: bool,
}

impl ChordSyncApp {
    /// Construct every service and attach the sync engine to playback
    ///
    /// # Errors
    /// Practice history that cannot be read from the store.
    pub fn new(config: EngineConfig, parts: AppParts) -> Result<Self> {
        let AppParts {
            capabilities,
            clock,
            tone_sink,
            store,
            surface,
            layout,
        } = parts;

        let sync = Arc::new(Mutex::new(SyncEngine::new(config.sync.clone())));
        let mut audio = AudioEngine::new(capabilities, clock.clone(), &config.playback);
        audio.attach_sync(sync.clone());

        let scroll = AutoScrollController::new(config.scroll.clone(), surface);
        let metronome = Metronome::from_config(&config.metronome, clock, tone_sink);
        let practice = PracticeCoordinator::new(&config.practice, store)?;

        Ok(Self {
            config,
            audio: Arc::new(tokio::sync::Mutex::new(audio)),
            sync,
            scroll: Arc::new(Mutex::new(scroll)),
            metronome: Arc::new(Mutex::new(metronome)),
            practice: Arc::new(Mutex::new(practice)),
            layout,
            tasks: Vec::new(),
            destroyed: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audio(&self) -> &Arc<tokio::sync::Mutex<AudioEngine>> {
        &self.audio
    }

    pub fn sync(&self) -> &Arc<Mutex<SyncEngine>> {
        &self.sync
    }

    pub fn scroll(&self) -> &Arc<Mutex<AutoScrollController>> {
        &self.scroll
    }

    pub fn metronome(&self) -> &Arc<Mutex<Metronome>> {
        &self.metronome
    }

    pub fn practice(&self) -> &Arc<Mutex<PracticeCoordinator>> {
        &self.practice
    }

    pub fn is_initialized(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn the drivers and the event router. Must run inside a tokio
    /// runtime; a second call does nothing.
    pub fn init(&mut self) {
        if self.destroyed || self.is_initialized() {
            return;
        }

        // subscribe before spawning so nothing emitted after init is missed
        let rx = self.sync.lock().unwrap_or_else(|e| e.into_inner()).subscribe();

        self.tasks.push(spawn_time_updates(
            self.audio.clone(),
            self.config.playback.time_update_interval(),
        ));
        self.tasks.push(spawn_metronome(
            self.metronome.clone(),
            self.config.metronome.schedule_interval(),
        ));
        self.tasks.push(spawn_scroll_frames(self.scroll.clone(), FRAME_INTERVAL));
        self.tasks.push(tokio::spawn(route_sync_events(
            rx,
            Router {
                audio: self.audio.clone(),
                sync: self.sync.clone(),
                scroll: self.scroll.clone(),
                practice: self.practice.clone(),
                layout: self.layout.clone(),
            },
        )));
        info!("chordsync services initialized ({} drivers)", self.tasks.len());
    }

    /// Load a timeline and its audio
    ///
    /// # Errors
    /// Invalid timeline (`SYNC_IMPORT_FAILED`) or playback load failure.
    pub async fn load(&self, timeline: Timeline, source: AudioSource) -> Result<()> {
        self.sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .import_timeline(timeline)?;
        self.audio.lock().await.load_track(source).await?;
        Ok(())
    }

    /// Abort drivers and destroy every service. Safe to call repeatedly.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.audio.lock().await.destroy();
        self.sync.lock().unwrap_or_else(|e| e.into_inner()).destroy();
        self.scroll.lock().unwrap_or_else(|e| e.into_inner()).destroy();
        self.metronome.lock().unwrap_or_else(|e| e.into_inner()).destroy();
        self.practice.lock().unwrap_or_else(|e| e.into_inner()).destroy();
        self.destroyed = true;
        info!("chordsync services destroyed");
    }
}

struct Router {
    audio: Arc<tokio::sync::Mutex<AudioEngine>>,
    sync: Arc<Mutex<SyncEngine>>,
    scroll: Arc<Mutex<AutoScrollController>>,
    practice: Arc<Mutex<PracticeCoordinator>>,
    layout: Arc<dyn ChordLayout>,
}

impl Router {
    async fn route(&self, event: SyncEvent) {
        match &event {
            SyncEvent::ChordChange {
                chord: Some(chord),
                position,
                ..
            } => {
                if let Some(target) = self.layout.chord_rect(chord) {
                    let request = ChordScrollRequest {
                        chord_id: chord.id.clone(),
                        target,
                        current_time: *position,
                    };
                    let now = tokio::time::Instant::now().into_std();
                    self.scroll
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .handle_chord_change(request, now);
                }
            }
            SyncEvent::TimelineLoaded { .. } => {
                let context = self
                    .sync
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .timeline()
                    .map(SmartScrollContext::from_timeline);
                if let Some(context) = context {
                    self.scroll
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .set_smart_context(context);
                }
            }
            SyncEvent::LoopStart { section } => {
                debug!("Loop restart, seeking to {:.2}", section.start_time);
                if let Err(e) = self.audio.lock().await.seek(section.start_time) {
                    warn!("Loop seek failed: {}", e);
                }
            }
            _ => {}
        }

        self.practice
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handle_sync_event(&event);
    }
}

async fn route_sync_events(mut rx: tokio::sync::broadcast::Receiver<SyncEvent>, router: Router) {
    loop {
        match rx.recv().await {
            Ok(event) => router.route(event).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event router lagged, skipped {} sync events", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Sync event bus closed, router exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_layout() {
        let layout = LinearLayout::new(100.0);
        let rect = layout.chord_rect(&ChordMapping::manual("Am", 2.0, 4.0)).unwrap();
        assert_eq!(rect, ElementRect::new(200.0, 200.0));
        assert_eq!(layout.content_height(30.0), 3000.0);
    }
}
