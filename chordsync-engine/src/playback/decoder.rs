//! In-memory audio decoding using symphonia
//!
//! The graph backend fetches the whole encoded file, decodes it once into
//! interleaved `f32` frames, and plays from that buffer. Seeking is then
//! just an offset into decoded memory.

use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::types::{PlatformError, PlatformErrorKind};

/// Fully decoded audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Frame index at a position in seconds (clamped to the buffer)
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        frame.min(self.frames())
    }

    /// Down-mixed mono window of `len` frames starting at `start_frame`
    ///
    /// Frames past the end of the buffer read as silence.
    pub fn mono_window(&self, start_frame: usize, len: usize) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        (start_frame..start_frame + len)
            .map(|frame| {
                let base = frame * channels;
                if base + channels > self.samples.len() {
                    return 0.0;
                }
                let sum: f32 = self.samples[base..base + channels].iter().sum();
                sum / channels as f32
            })
            .collect()
    }
}

fn decode_error(stage: &str, err: impl std::fmt::Display) -> PlatformError {
    PlatformError::new(PlatformErrorKind::Decode, format!("{}: {}", stage, err))
}

/// Decode an encoded audio file held in memory
///
/// # Arguments
/// * `bytes` - Encoded file contents
/// * `extension` - Optional file extension hint (`mp3`, `flac`, `wav`, ...)
///
/// # Errors
/// `PlatformErrorKind::Decode` when the format cannot be probed, has no
/// audio track, or yields no frames. Individual corrupt packets are
/// skipped with a warning.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, PlatformError> {
    if bytes.is_empty() {
        return Err(decode_error("probe", "empty input"));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error("probe", e))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("track", "no audio track found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| decode_error("track", "sample rate not found"))?;
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error("codec", e))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_error("read", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(decode_error("decode", e)),
        }
    }

    if samples.is_empty() || channels == 0 {
        return Err(decode_error("decode", "no audio frames decoded"));
    }

    let audio = DecodedAudio {
        samples,
        sample_rate,
        channels,
    };
    debug!(
        "Decoded {} frames ({:.2}s, {} Hz, {} ch)",
        audio.frames(),
        audio.duration(),
        audio.sample_rate,
        audio.channels
    );
    Ok(audio)
}
