//! Look-ahead metronome
//!
//! Beats are scheduled against the audio clock rather than fired from a
//! timer. A driver re-arms every ~100 ms and each pass schedules every beat
//! falling before `now + lookahead`, so timer jitter never reaches the
//! audible click.
//!
//! Changing tempo or meter only affects beats not yet scheduled.

use chordsync_common::easing::exponential_decay;
use chordsync_common::events::{EventBus, NamedEvent};
use chordsync_common::timeline::TimeSignature;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::AudioClock;
use crate::config::MetronomeConfig;

pub const MIN_BPM: u32 = 30;
pub const MAX_BPM: u32 = 300;

/// Default look-ahead window (seconds)
pub const DEFAULT_LOOKAHEAD: f64 = 0.1;

/// Beats per written beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Subdivision {
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    Triplet,
}

impl Subdivision {
    pub fn multiplier(&self) -> u32 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::Sixteenth => 4,
            Subdivision::Triplet => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetronomeSound {
    #[default]
    Click,
    Beep,
    Wood,
    Rim,
    Cowbell,
}

impl std::str::FromStr for MetronomeSound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "click" => Ok(MetronomeSound::Click),
            "beep" => Ok(MetronomeSound::Beep),
            "wood" => Ok(MetronomeSound::Wood),
            "rim" => Ok(MetronomeSound::Rim),
            "cowbell" => Ok(MetronomeSound::Cowbell),
            other => Err(format!("unknown metronome sound '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    /// 30–300
    pub bpm: u32,
    pub time_signature: TimeSignature,
    pub subdivision: Subdivision,
    /// Accent the first beat of each measure
    pub accent_beats: bool,
    pub sound: MetronomeSound,
    /// 0.0–1.0
    pub volume: f32,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            bpm: 120,
            time_signature: TimeSignature::common_time(),
            subdivision: Subdivision::Quarter,
            accent_beats: true,
            sound: MetronomeSound::Click,
            volume: 0.8,
        }
    }
}

impl MetronomeSettings {
    pub fn beats_per_measure(&self) -> u32 {
        (self.time_signature.numerator * self.subdivision.multiplier()).max(1)
    }

    /// Seconds between scheduled beats
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm.clamp(MIN_BPM, MAX_BPM) as f64 / self.subdivision.multiplier() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Waveform {
    /// One sample at `phase` cycles
    fn sample(&self, phase: f64) -> f64 {
        let frac = phase.fract();
        match self {
            Waveform::Sine => (2.0 * PI * frac).sin(),
            Waveform::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (frac - 0.5).abs(),
            Waveform::Sawtooth => 2.0 * frac - 1.0,
        }
    }
}

/// Gain the envelope decays to
const ENVELOPE_FLOOR: f64 = 0.001;

/// A synthesized metronome tone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    /// Hz
    pub frequency: f64,
    /// Seconds
    pub duration: f64,
    pub waveform: Waveform,
    /// Peak gain
    pub gain: f64,
    /// Linear attack (seconds)
    pub attack: f64,
}

impl ToneSpec {
    pub fn for_sound(sound: MetronomeSound, accent: bool, volume: f32) -> Self {
        let (normal, accented, duration, waveform) = match sound {
            MetronomeSound::Click => (1000.0, 1500.0, 0.05, Waveform::Square),
            MetronomeSound::Beep => (800.0, 1200.0, 0.1, Waveform::Sine),
            MetronomeSound::Wood => (400.0, 600.0, 0.08, Waveform::Triangle),
            MetronomeSound::Rim => (1700.0, 2000.0, 0.03, Waveform::Square),
            MetronomeSound::Cowbell => (540.0, 800.0, 0.15, Waveform::Square),
        };
        let level = if accent { 1.0 } else { 0.7 };
        Self {
            frequency: if accent { accented } else { normal },
            duration,
            waveform,
            gain: level * volume.clamp(0.0, 1.0) as f64,
            attack: 0.001,
        }
    }

    /// Envelope gain at `t` seconds into the tone
    pub fn envelope(&self, t: f64) -> f64 {
        if t < 0.0 || t >= self.duration {
            return 0.0;
        }
        if t < self.attack {
            return self.gain * t / self.attack;
        }
        if self.gain <= 0.0 {
            return 0.0;
        }
        exponential_decay(
            self.gain,
            ENVELOPE_FLOOR.min(self.gain),
            t - self.attack,
            self.duration - self.attack,
        )
    }

    /// Mono samples at `sample_rate`
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let sr = sample_rate.max(1) as f64;
        let len = (self.duration * sr).round() as usize;
        (0..len)
            .map(|i| {
                let t = i as f64 / sr;
                (self.waveform.sample(self.frequency * t) * self.envelope(t)) as f32
            })
            .collect()
    }
}

/// Destination of scheduled tones
pub trait ToneSink: Send {
    /// Play `tone` at audio-clock time `at`
    fn schedule(&mut self, at: f64, tone: &ToneSpec);
}

/// Discards every tone
#[derive(Debug, Default, Clone, Copy)]
pub struct NullToneSink;

impl ToneSink for NullToneSink {
    fn schedule(&mut self, _at: f64, _tone: &ToneSpec) {}
}

/// Mixes tones into an in-memory mono buffer starting at clock time 0
///
/// Clones share the buffer.
#[derive(Debug, Clone)]
pub struct BufferSink {
    sample_rate: u32,
    buffer: Arc<Mutex<Vec<f32>>>,
    scheduled: Arc<Mutex<Vec<f64>>>,
}

impl BufferSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffer: Arc::new(Mutex::new(Vec::new())),
            scheduled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn samples(&self) -> Vec<f32> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Clock times of every scheduled tone
    pub fn scheduled_times(&self) -> Vec<f64> {
        self.scheduled.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ToneSink for BufferSink {
    fn schedule(&mut self, at: f64, tone: &ToneSpec) {
        self.scheduled.lock().unwrap_or_else(|e| e.into_inner()).push(at);

        let rendered = tone.render(self.sample_rate);
        let start = (at.max(0.0) * self.sample_rate as f64).round() as usize;
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.len() < start + rendered.len() {
            buffer.resize(start + rendered.len(), 0.0);
        }
        for (slot, sample) in buffer[start..].iter_mut().zip(rendered) {
            *slot = (*slot + sample).clamp(-1.0, 1.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetronomeEvent {
    Beat {
        /// Zero-based count since start
        index: u64,
        /// Zero-based position in the measure
        beat: u32,
        /// One-based measure number
        measure: u64,
        accent: bool,
        /// Scheduled clock time
        time: f64,
    },
    Measure { measure: u64, time: f64 },
    Started { bpm: u32, time: f64 },
    Stopped { time: f64 },
}

impl NamedEvent for MetronomeEvent {
    fn event_name(&self) -> &'static str {
        match self {
            MetronomeEvent::Beat { .. } => "metronome:beat",
            MetronomeEvent::Measure { .. } => "metronome:measure",
            MetronomeEvent::Started { .. } => "metronome:started",
            MetronomeEvent::Stopped { .. } => "metronome:stopped",
        }
    }
}

pub struct Metronome {
    settings: MetronomeSettings,
    clock: Arc<dyn AudioClock>,
    sink: Box<dyn ToneSink>,
    events: EventBus<MetronomeEvent>,
    lookahead: f64,
    running: bool,
    next_note_time: f64,
    beat_index: u64,
    beat_in_measure: u32,
    measure: u64,
    destroyed: bool,
}

impl Metronome {
    pub fn new(settings: MetronomeSettings, clock: Arc<dyn AudioClock>, sink: Box<dyn ToneSink>) -> Self {
        let mut settings = settings;
        settings.bpm = settings.bpm.clamp(MIN_BPM, MAX_BPM);
        settings.volume = settings.volume.clamp(0.0, 1.0);
        Self {
            settings,
            clock,
            sink,
            events: EventBus::new(256),
            lookahead: DEFAULT_LOOKAHEAD,
            running: false,
            next_note_time: 0.0,
            beat_index: 0,
            beat_in_measure: 0,
            measure: 1,
            destroyed: false,
        }
    }

    pub fn from_config(config: &MetronomeConfig, clock: Arc<dyn AudioClock>, sink: Box<dyn ToneSink>) -> Self {
        let mut metronome = Self::new(config.settings.clone(), clock, sink);
        metronome.lookahead = config.lookahead_secs.max(0.0);
        metronome.events = EventBus::new(config.event_capacity);
        metronome
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetronomeEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &MetronomeSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Clock time of the next beat to be scheduled
    pub fn next_note_time(&self) -> f64 {
        self.next_note_time
    }

    /// Start with the first beat at the current clock time
    pub fn start(&mut self) {
        if self.running || self.destroyed {
            return;
        }
        let now = self.clock.now();
        self.running = true;
        self.next_note_time = now;
        self.beat_index = 0;
        self.beat_in_measure = 0;
        self.measure = 1;
        info!(
            "Metronome started at {} BPM, {} ({:?})",
            self.settings.bpm, self.settings.time_signature, self.settings.subdivision
        );
        self.events.emit_lossy(MetronomeEvent::Started {
            bpm: self.settings.bpm,
            time: now,
        });
        self.schedule_ahead();
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        let now = self.clock.now();
        info!("Metronome stopped after {} beats", self.beat_index);
        self.events.emit_lossy(MetronomeEvent::Stopped { time: now });
    }

    /// Schedule every beat before `now + lookahead`; returns how many
    pub fn schedule_ahead(&mut self) -> usize {
        if !self.running {
            return 0;
        }
        let horizon = self.clock.now() + self.lookahead;
        let mut scheduled = 0;
        while self.next_note_time < horizon {
            self.schedule_beat();
            self.advance();
            scheduled += 1;
        }
        scheduled
    }

    fn schedule_beat(&mut self) {
        let accent = self.settings.accent_beats && self.beat_in_measure == 0;
        let tone = ToneSpec::for_sound(self.settings.sound, accent, self.settings.volume);
        self.sink.schedule(self.next_note_time, &tone);

        debug!(
            "Beat {} (measure {}, beat {}) at {:.3}",
            self.beat_index, self.measure, self.beat_in_measure, self.next_note_time
        );
        if self.beat_in_measure == 0 {
            self.events.emit_lossy(MetronomeEvent::Measure {
                measure: self.measure,
                time: self.next_note_time,
            });
        }
        self.events.emit_lossy(MetronomeEvent::Beat {
            index: self.beat_index,
            beat: self.beat_in_measure,
            measure: self.measure,
            accent,
            time: self.next_note_time,
        });
    }

    fn advance(&mut self) {
        self.next_note_time += self.settings.beat_interval();
        self.beat_index += 1;
        self.beat_in_measure += 1;
        if self.beat_in_measure >= self.settings.beats_per_measure() {
            self.beat_in_measure = 0;
            self.measure += 1;
        }
    }

    /// Clamped to 30–300
    pub fn set_bpm(&mut self, bpm: u32) {
        self.settings.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    /// Takes effect from the next measure when the current one is now too long
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.settings.time_signature = time_signature;
        self.wrap_measure();
    }

    pub fn set_subdivision(&mut self, subdivision: Subdivision) {
        self.settings.subdivision = subdivision;
        self.wrap_measure();
    }

    fn wrap_measure(&mut self) {
        if self.beat_in_measure >= self.settings.beats_per_measure() {
            self.beat_in_measure = 0;
            self.measure += 1;
        }
    }

    pub fn set_sound(&mut self, sound: MetronomeSound) {
        self.settings.sound = sound;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.settings.volume = volume.clamp(0.0, 1.0);
    }

    /// Stop and release. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop();
        self.destroyed = true;
    }
}

/// Spawn the look-ahead re-arm driver
///
/// Runs until the metronome is destroyed; idle ticks while stopped.
pub fn spawn_metronome(metronome: Arc<Mutex<Metronome>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut metronome = metronome.lock().unwrap_or_else(|e| e.into_inner());
            if metronome.is_destroyed() {
                debug!("Metronome driver exiting");
                break;
            }
            metronome.schedule_ahead();
        }
    })
}
