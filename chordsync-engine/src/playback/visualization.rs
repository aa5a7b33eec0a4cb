//! Analyser snapshots computed from the decoded buffer
//!
//! Pull-based: the host calls [`snapshot`] from its own render loop. Nothing
//! here runs on the time-update driver.

use super::decoder::DecodedAudio;
use super::types::VisualizationData;

/// Analysis window in frames
pub const WINDOW_SIZE: usize = 256;

/// Frequency bins returned (half the window)
pub const FREQUENCY_BINS: usize = WINDOW_SIZE / 2;

/// Decibel range mapped onto the 0–255 byte range
pub const MIN_DECIBELS: f64 = -100.0;
pub const MAX_DECIBELS: f64 = -30.0;

/// Snapshot of the window ending at `position` seconds
pub fn snapshot(audio: &DecodedAudio, position: f64) -> VisualizationData {
    let end = audio.frame_at(position);
    let start = end.saturating_sub(WINDOW_SIZE);
    let window = audio.mono_window(start, WINDOW_SIZE);

    VisualizationData {
        frequency: frequency_bytes(&window),
        time_domain: time_domain_bytes(&window),
        position,
    }
}

/// `[-1, 1]` samples to bytes, silence at 128
pub fn time_domain_bytes(window: &[f32]) -> Vec<u8> {
    window
        .iter()
        .map(|s| (128.0 + s.clamp(-1.0, 1.0) * 127.0).round() as u8)
        .collect()
}

/// Hann-windowed DFT magnitudes, in dB, scaled into bytes
pub fn frequency_bytes(window: &[f32]) -> Vec<u8> {
    let n = window.len();
    if n == 0 {
        return vec![0; FREQUENCY_BINS];
    }

    let windowed: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let hann = 0.5 - 0.5 * (std::f64::consts::TAU * i as f64 / n as f64).cos();
            *s as f64 * hann
        })
        .collect();

    (0..FREQUENCY_BINS)
        .map(|k| {
            let (mut re, mut im) = (0.0, 0.0);
            for (i, x) in windowed.iter().enumerate() {
                let phase = std::f64::consts::TAU * k as f64 * i as f64 / n as f64;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / n as f64;
            db_to_byte(20.0 * magnitude.max(1e-12).log10())
        })
        .collect()
}

fn db_to_byte(db: f64) -> u8 {
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
    scaled.clamp(0.0, 255.0) as u8
}
