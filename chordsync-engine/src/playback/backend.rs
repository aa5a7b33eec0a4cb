//! Playback backends
//!
//! Two mutually exclusive backends sit behind one contract:
//!
//! - [`GraphBackend`]: fetches and fully decodes the track, plays it through a
//!   [`GraphOutput`], and derives position from an [`AudioClock`]. Supports
//!   visualization snapshots.
//! - [`ElementBackend`]: delegates everything to a platform [`MediaElement`].
//!
//! [`Backend::select`] probes the [`AudioCapabilities`] once at construction.
//! Callers dispatch through [`Backend`] and never check which variant is live.

use async_trait::async_trait;
use chordsync_common::timeline::AudioSource;
use std::sync::Arc;
use tracing::{debug, info};

use super::decoder::{self, DecodedAudio};
use super::types::{BackendKind, PlatformError, PlatformErrorKind, VisualizationData};
use super::visualization;
use crate::clock::AudioClock;

/// Fetches the encoded bytes behind an audio source URL
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlatformError>;
}

/// Output stage of the decode graph (source node + gain node + destination)
#[async_trait]
pub trait GraphOutput: Send {
    /// Resume a suspended output context
    ///
    /// Platforms with autoplay policies fail this with `NotAllowed`.
    async fn resume(&mut self) -> Result<(), PlatformError>;

    /// Start a new source at `offset` seconds into `audio`
    ///
    /// Any previously started source is replaced.
    fn start(
        &mut self,
        audio: Arc<DecodedAudio>,
        offset: f64,
        rate: f64,
        gain: f32,
    ) -> Result<(), PlatformError>;

    fn stop(&mut self);

    fn set_gain(&mut self, gain: f32);

    fn set_rate(&mut self, rate: f64);
}

/// A platform media element (the fallback backend)
#[async_trait]
pub trait MediaElement: Send {
    /// Load a URL; resolves with the media duration in seconds
    async fn load(&mut self, url: &str) -> Result<f64, PlatformError>;

    async fn play(&mut self) -> Result<(), PlatformError>;

    fn pause(&mut self);

    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    fn set_playback_rate(&mut self, rate: f64);

    fn ended(&self) -> bool;
}

/// Collaborators needed by the graph backend
pub struct GraphPlatform {
    pub fetcher: Arc<dyn AudioFetcher>,
    pub output: Box<dyn GraphOutput>,
}

/// What the host platform offers, probed once when the engine is built
#[derive(Default)]
pub struct AudioCapabilities {
    pub graph: Option<GraphPlatform>,
    pub element: Option<Box<dyn MediaElement>>,
}

impl AudioCapabilities {
    /// No playback support at all
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_graph(fetcher: Arc<dyn AudioFetcher>, output: Box<dyn GraphOutput>) -> Self {
        Self {
            graph: Some(GraphPlatform { fetcher, output }),
            element: None,
        }
    }

    pub fn with_element(element: Box<dyn MediaElement>) -> Self {
        Self {
            graph: None,
            element: Some(element),
        }
    }
}

/// Decode-graph backend
pub struct GraphBackend {
    fetcher: Arc<dyn AudioFetcher>,
    output: Box<dyn GraphOutput>,
    clock: Arc<dyn AudioClock>,
    audio: Option<Arc<DecodedAudio>>,
    /// Track position at the last start/pause/seek
    offset: f64,
    /// Clock time of the last start; `None` while not running
    started_at: Option<f64>,
    rate: f64,
    gain: f32,
}

impl GraphBackend {
    pub fn new(platform: GraphPlatform, clock: Arc<dyn AudioClock>) -> Self {
        Self {
            fetcher: platform.fetcher,
            output: platform.output,
            clock,
            audio: None,
            offset: 0.0,
            started_at: None,
            rate: 1.0,
            gain: 1.0,
        }
    }

    async fn load(&mut self, source: &AudioSource) -> Result<f64, PlatformError> {
        self.output.stop();
        self.audio = None;
        self.started_at = None;
        self.offset = 0.0;

        let bytes = self.fetcher.fetch(&source.url).await?;
        debug!("Fetched {} bytes for {}", bytes.len(), source.id);

        let hint = source.extension_hint();
        let audio = tokio::task::spawn_blocking(move || decoder::decode_bytes(bytes, hint.as_deref()))
            .await
            .map_err(|e| PlatformError::new(PlatformErrorKind::Other, format!("decode task failed: {}", e)))??;

        let duration = audio.duration();
        self.audio = Some(Arc::new(audio));
        Ok(duration)
    }

    async fn play(&mut self) -> Result<(), PlatformError> {
        let audio = self
            .audio
            .clone()
            .ok_or_else(|| PlatformError::new(PlatformErrorKind::NotSupported, "no decoded audio"))?;
        if self.started_at.is_some() {
            return Ok(());
        }
        self.output.resume().await?;
        self.output.start(audio, self.offset, self.rate, self.gain)?;
        self.started_at = Some(self.clock.now());
        Ok(())
    }

    fn pause(&mut self) {
        if self.started_at.is_some() {
            self.offset = self.position();
            self.started_at = None;
            self.output.stop();
        }
    }

    fn stop(&mut self) {
        self.output.stop();
        self.started_at = None;
        self.offset = 0.0;
    }

    fn duration(&self) -> f64 {
        self.audio.as_ref().map_or(0.0, |a| a.duration())
    }

    fn position(&self) -> f64 {
        match self.started_at {
            Some(started_at) => {
                let elapsed = (self.clock.now() - started_at).max(0.0);
                (self.offset + elapsed * self.rate).min(self.duration())
            }
            None => self.offset,
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<(), PlatformError> {
        self.offset = seconds;
        if self.started_at.is_some() {
            if let Some(audio) = self.audio.clone() {
                self.output.stop();
                self.output.start(audio, seconds, self.rate, self.gain)?;
                self.started_at = Some(self.clock.now());
            }
        }
        Ok(())
    }

    fn set_output_volume(&mut self, volume: f32, muted: bool) {
        self.gain = if muted { 0.0 } else { volume };
        self.output.set_gain(self.gain);
    }

    fn set_rate(&mut self, rate: f64) {
        // Rebase so the elapsed time so far keeps the old rate
        if self.started_at.is_some() {
            self.offset = self.position();
            self.started_at = Some(self.clock.now());
        }
        self.rate = rate;
        self.output.set_rate(rate);
    }

    fn ended(&self) -> bool {
        let duration = self.duration();
        self.started_at.is_some() && duration > 0.0 && self.position() >= duration
    }

    fn visualization(&self) -> Option<VisualizationData> {
        self.audio
            .as_ref()
            .map(|audio| visualization::snapshot(audio, self.position()))
    }
}

/// Media-element fallback backend
pub struct ElementBackend {
    element: Box<dyn MediaElement>,
}

impl ElementBackend {
    pub fn new(element: Box<dyn MediaElement>) -> Self {
        Self { element }
    }
}

/// The selected backend
pub enum Backend {
    Graph(GraphBackend),
    Element(ElementBackend),
}

impl Backend {
    /// Pick a backend from the probed capabilities
    ///
    /// Prefers the graph backend unless `prefer_fallback` is set and an
    /// element is available. Returns `None` when the platform offers
    /// neither.
    pub fn select(
        capabilities: AudioCapabilities,
        clock: Arc<dyn AudioClock>,
        prefer_fallback: bool,
    ) -> Option<Backend> {
        let AudioCapabilities { graph, element } = capabilities;

        let backend = match (graph, element) {
            (_, Some(element)) if prefer_fallback => Backend::Element(ElementBackend::new(element)),
            (Some(graph), _) => Backend::Graph(GraphBackend::new(graph, clock)),
            (None, Some(element)) => Backend::Element(ElementBackend::new(element)),
            (None, None) => return None,
        };

        info!("Selected {:?} playback backend", backend.kind());
        Some(backend)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Graph(_) => BackendKind::Graph,
            Backend::Element(_) => BackendKind::Element,
        }
    }

    /// Load a source; resolves with its duration in seconds
    pub async fn load(&mut self, source: &AudioSource) -> Result<f64, PlatformError> {
        match self {
            Backend::Graph(graph) => graph.load(source).await,
            Backend::Element(el) => el.element.load(&source.url).await,
        }
    }

    pub async fn play(&mut self) -> Result<(), PlatformError> {
        match self {
            Backend::Graph(graph) => graph.play().await,
            Backend::Element(el) => el.element.play().await,
        }
    }

    pub fn pause(&mut self) {
        match self {
            Backend::Graph(graph) => graph.pause(),
            Backend::Element(el) => el.element.pause(),
        }
    }

    /// Halt output and rewind to 0
    pub fn stop(&mut self) {
        match self {
            Backend::Graph(graph) => graph.stop(),
            Backend::Element(el) => {
                el.element.pause();
                el.element.set_current_time(0.0);
            }
        }
    }

    pub fn position(&self) -> f64 {
        match self {
            Backend::Graph(graph) => graph.position(),
            Backend::Element(el) => el.element.current_time(),
        }
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), PlatformError> {
        match self {
            Backend::Graph(graph) => graph.seek(seconds),
            Backend::Element(el) => {
                el.element.set_current_time(seconds);
                Ok(())
            }
        }
    }

    pub fn set_output_volume(&mut self, volume: f32, muted: bool) {
        match self {
            Backend::Graph(graph) => graph.set_output_volume(volume, muted),
            Backend::Element(el) => {
                el.element.set_volume(volume);
                el.element.set_muted(muted);
            }
        }
    }

    pub fn set_rate(&mut self, rate: f64) {
        match self {
            Backend::Graph(graph) => graph.set_rate(rate),
            Backend::Element(el) => el.element.set_playback_rate(rate),
        }
    }

    pub fn ended(&self) -> bool {
        match self {
            Backend::Graph(graph) => graph.ended(),
            Backend::Element(el) => el.element.ended(),
        }
    }

    /// Analyser snapshot (graph backend only)
    pub fn visualization(&self) -> Option<VisualizationData> {
        match self {
            Backend::Graph(graph) => graph.visualization(),
            Backend::Element(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::playback::headless::{MemoryFetcher, SilentOutput};

    fn tone(seconds: f64) -> DecodedAudio {
        let frames = (seconds * 1000.0) as usize;
        DecodedAudio {
            samples: vec![0.25; frames],
            sample_rate: 1000,
            channels: 1,
        }
    }

    fn graph_with(clock: Arc<ManualClock>, output: SilentOutput) -> GraphBackend {
        let mut graph = GraphBackend::new(
            GraphPlatform {
                fetcher: Arc::new(MemoryFetcher::new()),
                output: Box::new(output),
            },
            clock,
        );
        graph.audio = Some(Arc::new(tone(10.0)));
        graph
    }

    #[test]
    fn test_select_prefers_graph() {
        let clock: Arc<dyn AudioClock> = Arc::new(ManualClock::new(0.0));
        let caps = AudioCapabilities::with_graph(
            Arc::new(MemoryFetcher::new()),
            Box::new(SilentOutput::new()),
        );
        let backend = Backend::select(caps, clock.clone(), false).unwrap();
        assert_eq!(backend.kind(), BackendKind::Graph);

        assert!(Backend::select(AudioCapabilities::none(), clock, false).is_none());
    }

    #[tokio::test]
    async fn test_graph_position_follows_clock_and_rate() {
        let clock = Arc::new(ManualClock::new(100.0));
        let output = SilentOutput::new();
        let mut graph = graph_with(clock.clone(), output.clone());

        graph.play().await.unwrap();
        assert!(output.is_running());
        clock.advance(2.0);
        assert!((graph.position() - 2.0).abs() < 1e-9);

        graph.set_rate(2.0);
        clock.advance(1.0);
        assert!((graph.position() - 4.0).abs() < 1e-9);

        graph.pause();
        clock.advance(5.0);
        assert!((graph.position() - 4.0).abs() < 1e-9);
        assert!(!output.is_running());
    }

    #[tokio::test]
    async fn test_graph_seek_while_playing_restarts_source() {
        let clock = Arc::new(ManualClock::new(0.0));
        let output = SilentOutput::new();
        let mut graph = graph_with(clock.clone(), output.clone());

        graph.play().await.unwrap();
        clock.advance(1.0);
        graph.seek(7.5).unwrap();
        assert_eq!(output.starts(), 2);
        assert!((graph.position() - 7.5).abs() < 1e-9);

        clock.advance(5.0);
        assert_eq!(graph.position(), 10.0);
        assert!(graph.ended());
    }

    #[tokio::test]
    async fn test_graph_mute_zeroes_gain() {
        let clock = Arc::new(ManualClock::new(0.0));
        let output = SilentOutput::new();
        let mut graph = graph_with(clock, output.clone());

        graph.set_output_volume(0.6, false);
        assert_eq!(output.gain(), 0.6);
        graph.set_output_volume(0.6, true);
        assert_eq!(output.gain(), 0.0);
    }

    #[test]
    fn test_graph_visualization_available_after_decode() {
        let clock = Arc::new(ManualClock::new(0.0));
        let graph = graph_with(clock, SilentOutput::new());
        let data = graph.visualization().unwrap();
        assert_eq!(data.time_domain.len(), visualization::WINDOW_SIZE);
    }
}
