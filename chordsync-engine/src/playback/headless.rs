//! Headless platform adapters
//!
//! Let the graph backend run without a browser or sound device: audio comes
//! from local files (or memory), and the output only records what it was
//! asked to do. Used by the CLI and by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::backend::{AudioCapabilities, AudioFetcher, GraphOutput};
use super::decoder::DecodedAudio;
use super::types::{PlatformError, PlatformErrorKind};

/// Reads audio from a local path or `file://` URL
#[derive(Debug, Default, Clone)]
pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        tokio::fs::read(path).await.map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::PermissionDenied => PlatformErrorKind::NotAllowed,
                _ => PlatformErrorKind::Network,
            };
            PlatformError::new(kind, format!("{}: {}", path.display(), e))
        })
    }
}

/// Serves fixed byte buffers by URL
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.insert(url.into(), bytes);
        self
    }
}

#[async_trait]
impl AudioFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| PlatformError::new(PlatformErrorKind::Network, format!("404: {}", url)))
    }
}

#[derive(Debug)]
struct OutputState {
    running: bool,
    starts: usize,
    gain: f32,
    rate: f64,
    last_offset: f64,
    refuse_resume: bool,
}

/// A graph output with no device behind it
///
/// Clones share state, so a test can keep a handle after handing the
/// output to the engine.
#[derive(Debug, Clone)]
pub struct SilentOutput {
    state: Arc<Mutex<OutputState>>,
}

impl Default for SilentOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl SilentOutput {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                running: false,
                starts: 0,
                gain: 1.0,
                rate: 1.0,
                last_offset: 0.0,
                refuse_resume: false,
            })),
        }
    }

    /// An output whose context stays suspended (autoplay refused)
    pub fn refusing_resume() -> Self {
        let output = Self::new();
        output.lock().refuse_resume = true;
        output
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of sources started so far
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn last_offset(&self) -> f64 {
        self.lock().last_offset
    }
}

#[async_trait]
impl GraphOutput for SilentOutput {
    async fn resume(&mut self) -> Result<(), PlatformError> {
        if self.lock().refuse_resume {
            return Err(PlatformError::new(
                PlatformErrorKind::NotAllowed,
                "output context requires a user gesture",
            ));
        }
        Ok(())
    }

    fn start(
        &mut self,
        audio: Arc<DecodedAudio>,
        offset: f64,
        rate: f64,
        gain: f32,
    ) -> Result<(), PlatformError> {
        if offset > audio.duration() {
            return Err(PlatformError::new(
                PlatformErrorKind::Other,
                format!("offset {:.3}s past end of buffer", offset),
            ));
        }
        let mut state = self.lock();
        state.running = true;
        state.starts += 1;
        state.rate = rate;
        state.gain = gain;
        state.last_offset = offset;
        Ok(())
    }

    fn stop(&mut self) {
        self.lock().running = false;
    }

    fn set_gain(&mut self, gain: f32) {
        self.lock().gain = gain;
    }

    fn set_rate(&mut self, rate: f64) {
        self.lock().rate = rate;
    }
}

impl AudioCapabilities {
    /// Graph backend over local files with a silent output
    pub fn headless() -> Self {
        Self::with_graph(Arc::new(FileFetcher::new()), Box::new(SilentOutput::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PlaybackConfig;
    use crate::playback::backend::{GraphPlatform, MediaElement};
    use crate::playback::engine::AudioEngine;
    use crate::playback::types::{BackendKind, PlaybackStatus};
    use chordsync_common::timeline::AudioSource;
    use std::io::Write;

    #[derive(Debug, Default)]
    struct ElementState {
        url: Option<String>,
        time: f64,
        playing: bool,
        volume: f32,
        muted: bool,
        rate: f64,
    }

    /// Media element whose playhead only moves when a test sets it
    #[derive(Clone)]
    struct FakeElement {
        duration: f64,
        state: Arc<Mutex<ElementState>>,
    }

    impl FakeElement {
        fn new(duration: f64) -> Self {
            Self {
                duration,
                state: Arc::new(Mutex::new(ElementState::default())),
            }
        }

        fn state(&self) -> std::sync::MutexGuard<'_, ElementState> {
            self.state.lock().unwrap()
        }
    }

    #[async_trait]
    impl MediaElement for FakeElement {
        async fn load(&mut self, url: &str) -> Result<f64, PlatformError> {
            let mut state = self.state();
            state.url = Some(url.to_string());
            state.time = 0.0;
            Ok(self.duration)
        }

        async fn play(&mut self) -> Result<(), PlatformError> {
            self.state().playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.state().playing = false;
        }

        fn current_time(&self) -> f64 {
            self.state().time
        }

        fn set_current_time(&mut self, seconds: f64) {
            self.state().time = seconds;
        }

        fn set_volume(&mut self, volume: f32) {
            self.state().volume = volume;
        }

        fn set_muted(&mut self, muted: bool) {
            self.state().muted = muted;
        }

        fn set_playback_rate(&mut self, rate: f64) {
            self.state().rate = rate;
        }

        fn ended(&self) -> bool {
            self.state().time >= self.duration
        }
    }

    fn element_engine(element: FakeElement) -> AudioEngine {
        AudioEngine::new(
            AudioCapabilities::with_element(Box::new(element)),
            Arc::new(ManualClock::new(0.0)),
            &PlaybackConfig::default(),
        )
    }

    #[test]
    fn test_element_only_platform_uses_fallback() {
        let engine = element_engine(FakeElement::new(8.0));
        assert_eq!(engine.state().backend, BackendKind::Element);
        assert!(engine.state().using_fallback);
        assert!(engine.state().error.is_none());
    }

    #[test]
    fn test_prefer_fallback_overrides_graph() {
        let both = || AudioCapabilities {
            graph: Some(GraphPlatform {
                fetcher: Arc::new(MemoryFetcher::new()),
                output: Box::new(SilentOutput::new()),
            }),
            element: Some(Box::new(FakeElement::new(8.0))),
        };
        let clock = Arc::new(ManualClock::new(0.0));

        let preferred = PlaybackConfig {
            prefer_fallback: true,
            ..PlaybackConfig::default()
        };
        let engine = AudioEngine::new(both(), clock.clone(), &preferred);
        assert_eq!(engine.state().backend, BackendKind::Element);
        assert!(engine.state().using_fallback);

        let engine = AudioEngine::new(both(), clock, &PlaybackConfig::default());
        assert_eq!(engine.state().backend, BackendKind::Graph);
        assert!(!engine.state().using_fallback);
    }

    #[tokio::test]
    async fn test_element_backed_playback() {
        let element = FakeElement::new(8.0);
        let mut engine = element_engine(element.clone());

        engine.load_track(AudioSource::new("song", "mem://song.mp3")).await.unwrap();
        assert_eq!(engine.state().duration, 8.0);
        assert_eq!(element.state().url.as_deref(), Some("mem://song.mp3"));

        engine.set_volume(0.5).unwrap();
        engine.set_playback_rate(1.25).unwrap();
        assert_eq!(element.state().volume, 0.5);
        assert_eq!(element.state().rate, 1.25);

        engine.play().await.unwrap();
        assert!(element.state().playing);
        element.state().time = 3.0;
        assert_eq!(engine.tick(), Some(3.0));

        engine.seek(20.0).unwrap();
        assert_eq!(engine.state().current_time, 8.0);
        assert_eq!(element.state().time, 8.0);
        engine.seek(-1.0).unwrap();
        assert_eq!(element.state().time, 0.0);

        assert!(engine.visualization().is_none());

        element.state().time = 8.0;
        engine.tick();
        assert_eq!(engine.state().status, PlaybackStatus::Ended);
        assert!(!element.state().playing);

        engine.stop().unwrap();
        assert_eq!(element.state().time, 0.0);
        assert_eq!(engine.state().status, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn test_file_fetcher_reads_plain_and_file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFF").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let fetcher = FileFetcher::new();
        assert_eq!(fetcher.fetch(&path).await.unwrap(), b"RIFF");
        let url = format!("file://{}", path);
        assert_eq!(fetcher.fetch(&url).await.unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_file_fetcher_missing_file_is_network_error() {
        let err = FileFetcher::new()
            .fetch("/definitely/not/here.mp3")
            .await
            .unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::Network);
    }

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new().with("mem://a", vec![1, 2, 3]);
        assert_eq!(fetcher.fetch("mem://a").await.unwrap(), vec![1, 2, 3]);
        assert!(fetcher.fetch("mem://b").await.is_err());
    }

    #[tokio::test]
    async fn test_refusing_output() {
        let mut output = SilentOutput::refusing_resume();
        let err = output.resume().await.unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::NotAllowed);
    }
}
