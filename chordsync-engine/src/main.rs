//! chordsync - headless driver for the synchronization engine
//!
//! Subcommands:
//! - `follow`: play a track silently against its timeline and log chord
//!   changes, markers and loop restarts as they happen
//! - `validate`: check a timeline file and print a summary
//! - `metronome`: run the look-ahead metronome and log beats

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chordsync_common::events::NamedEvent;
use chordsync_common::time::format_position;
use chordsync_common::timeline::{AudioSource, TimeSignature, Timeline};
use chordsync_engine::config::EngineConfig;
use chordsync_engine::playback::{AudioCapabilities, PlaybackEvent};
use chordsync_engine::practice::{
    spawn_metronome, BufferSink, JsonFileStore, Metronome, MetronomeEvent, MetronomeSound, NullToneSink,
    SessionOptions,
};
use chordsync_engine::scroll::{ScrollEvent, VirtualSurface};
use chordsync_engine::sync::SyncEvent;
use chordsync_engine::{AppParts, ChordSyncApp, LinearLayout, SystemClock};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pixels per second of the virtual chord sheet in `follow`
const SHEET_PIXELS_PER_SECOND: f64 = 40.0;
const SHEET_VIEWPORT: f64 = 600.0;

#[derive(Parser, Debug)]
#[command(name = "chordsync")]
#[command(about = "Chord timeline synchronization engine")]
#[command(version)]
struct Args {
    /// Config file (overrides CHORDSYNC_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a track against its timeline and log synchronization events
    Follow {
        /// Timeline JSON file
        #[arg(short, long)]
        timeline: PathBuf,

        /// Audio file (wav, mp3, flac, ogg, m4a)
        #[arg(short, long)]
        audio: PathBuf,

        /// Enable loop sections and record a practice session
        #[arg(long)]
        practice: bool,
    },

    /// Validate a timeline file
    Validate {
        /// Timeline JSON file
        timeline: PathBuf,
    },

    /// Run the metronome
    Metronome {
        /// Beats per minute (30-300)
        #[arg(long, env = "CHORDSYNC_BPM")]
        bpm: Option<u32>,

        /// Beats per measure
        #[arg(long)]
        beats: Option<u32>,

        /// click, beep, wood, rim or cowbell
        #[arg(long)]
        sound: Option<MetronomeSound>,

        /// Stop after this many beats
        #[arg(long, default_value = "16")]
        count: u64,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("chordsync={level},chordsync_engine={level},chordsync_common={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    info!(
        "chordsync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match args.command {
        Command::Follow {
            timeline,
            audio,
            practice,
        } => follow(config, &timeline, &audio, practice).await,
        Command::Validate { timeline } => validate(&timeline),
        Command::Metronome {
            bpm,
            beats,
            sound,
            count,
        } => metronome(config, bpm, beats, sound, count).await,
    }
}

fn read_timeline(path: &Path) -> Result<Timeline> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Timeline::from_json(&json).with_context(|| format!("Invalid timeline {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let timeline = read_timeline(path)?;
    println!("Timeline {} (version {})", timeline.id, timeline.version);
    println!("  audio source: {}", timeline.audio_source_id);
    if let Some(title) = &timeline.metadata.title {
        println!("  title:        {}", title);
    }
    println!("  chords:       {}", timeline.chord_mappings.len());
    println!("  markers:      {}", timeline.markers.len());
    println!("  loops:        {}", timeline.loop_sections.len());
    if let Some(last) = timeline.chord_mappings.iter().map(|m| m.end_time).reduce(f64::max) {
        println!("  last chord:   {}", format_position(last));
    }
    Ok(())
}

async fn follow(mut config: EngineConfig, timeline_path: &Path, audio_path: &Path, practice: bool) -> Result<()> {
    let timeline = read_timeline(timeline_path)?;
    if practice {
        config.sync.practice_mode = true;
    }

    let length = timeline
        .metadata
        .duration
        .or_else(|| timeline.chord_mappings.iter().map(|m| m.end_time).reduce(f64::max))
        .unwrap_or(0.0);
    let layout = LinearLayout::new(SHEET_PIXELS_PER_SECOND);
    let store = JsonFileStore::open(config.practice.store_dir()).context("Failed to open practice store")?;
    info!("Practice data in {}", store.dir().display());

    let parts = AppParts {
        capabilities: AudioCapabilities::headless(),
        clock: Arc::new(SystemClock::new()),
        tone_sink: Box::new(NullToneSink),
        store: Arc::new(store),
        surface: Box::new(VirtualSurface::new(
            SHEET_VIEWPORT,
            layout.content_height(length) + SHEET_VIEWPORT,
        )),
        layout: Arc::new(layout),
    };
    let mut app = ChordSyncApp::new(config, parts).context("Failed to initialize services")?;
    app.init();

    let loop_section = timeline.loop_sections.iter().find(|l| l.enabled).cloned();
    let source = AudioSource::new(timeline.audio_source_id.clone(), audio_path.to_string_lossy());
    app.load(timeline, source).await.context("Failed to load track")?;

    if practice {
        if let Some(section) = loop_section {
            info!(
                "Looping {} - {}",
                format_position(section.start_time),
                format_position(section.end_time)
            );
            app.sync().lock().unwrap_or_else(|e| e.into_inner()).set_loop_section(Some(section));
        }
        app.practice()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .start_session(SessionOptions::default(), chrono::Utc::now())?;
    }

    let mut sync_rx = app.sync().lock().unwrap_or_else(|e| e.into_inner()).subscribe();
    let mut scroll_rx = app.scroll().lock().unwrap_or_else(|e| e.into_inner()).subscribe();
    let mut playback_rx = {
        let mut audio = app.audio().lock().await;
        let rx = audio.subscribe();
        audio.play().await.context("Playback failed to start")?;
        rx
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = sync_rx.recv() => match event {
                Ok(event) => log_sync_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Missed {} sync events", n),
                Err(RecvError::Closed) => break,
            },
            event = scroll_rx.recv() => {
                if let Ok(ScrollEvent::ScrollCompleted { offset, .. }) = event {
                    debug!("Sheet scrolled to {:.0}px", offset);
                }
            }
            event = playback_rx.recv() => match event {
                Ok(PlaybackEvent::Ended { .. }) => {
                    info!("Playback finished");
                    break;
                }
                Ok(PlaybackEvent::Error { error }) if !error.recoverable => {
                    app.destroy().await;
                    bail!("{}", error);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    if practice {
        let mut coordinator = app.practice().lock().unwrap_or_else(|e| e.into_inner());
        let session = coordinator.end_session(chrono::Utc::now())?;
        info!(
            "Practiced {:.0}s: {} chord changes, {} loop passes, streak {}",
            session.duration,
            session.statistics.chord_changes,
            session.statistics.loops_completed,
            coordinator.progress().current_streak
        );
    }
    app.destroy().await;
    Ok(())
}

fn log_sync_event(event: &SyncEvent) {
    match event {
        SyncEvent::ChordChange {
            chord: Some(chord),
            next_chord,
            position,
        } => info!(
            "{}  {:<8} next: {}",
            format_position(*position),
            chord.chord_name,
            next_chord.as_ref().map_or("-", |n| n.chord_name.as_str())
        ),
        SyncEvent::ChordChange { chord: None, position, .. } => {
            info!("{}  (no chord)", format_position(*position))
        }
        SyncEvent::MarkerReached { marker, position } => {
            debug!("{}  [{}]", format_position(*position), marker.label)
        }
        SyncEvent::LoopStart { section } => info!("Loop restart at {}", format_position(section.start_time)),
        SyncEvent::Error { error } => warn!("{}", error),
        other => debug!("{}", other.event_name()),
    }
}

async fn metronome(
    config: EngineConfig,
    bpm: Option<u32>,
    beats: Option<u32>,
    sound: Option<MetronomeSound>,
    count: u64,
) -> Result<()> {
    let mut metronome_config = config.metronome.clone();
    if let Some(bpm) = bpm {
        metronome_config.settings.bpm = bpm;
    }
    if let Some(beats) = beats {
        if beats == 0 {
            bail!("beats per measure must be at least 1");
        }
        metronome_config.settings.time_signature = TimeSignature::new(beats, 4);
    }
    if let Some(sound) = sound {
        metronome_config.settings.sound = sound;
    }

    let sink = BufferSink::new(metronome_config.sample_rate);
    let metronome = Arc::new(Mutex::new(Metronome::from_config(
        &metronome_config,
        Arc::new(SystemClock::new()),
        Box::new(sink.clone()),
    )));

    let mut rx = {
        let mut m = metronome.lock().unwrap_or_else(|e| e.into_inner());
        let rx = m.subscribe();
        m.start();
        rx
    };
    let driver = spawn_metronome(metronome.clone(), metronome_config.schedule_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(MetronomeEvent::Beat { index, beat, measure, accent, time }) => {
                    info!(
                        "{:>3}  measure {} beat {}{}  @ {:.3}s",
                        index + 1,
                        measure,
                        beat + 1,
                        if accent { " >" } else { "" },
                        time
                    );
                    if index + 1 >= count {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    metronome.lock().unwrap_or_else(|e| e.into_inner()).destroy();
    driver.await.context("Metronome driver panicked")?;
    info!(
        "Rendered {} tones ({} samples at {} Hz)",
        sink.scheduled_times().len(),
        sink.samples().len(),
        metronome_config.sample_rate
    );
    Ok(())
}
