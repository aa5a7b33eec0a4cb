//! Automatic chord detection contract
//!
//! The recognition algorithm itself lives outside this crate behind
//! [`ChordAnalyzer`]. This module defines the request ([`AutoDetectionConfig`]),
//! the raw detector output, and the post-processing that turns raw
//! detections into timeline-ready [`ChordMapping`]s.

use chordsync_common::timeline::{ChordMapping, TimeSignature};
use serde::{Deserialize, Serialize};

use crate::playback::DecodedAudio;

/// Error type returned by analyzer implementations
pub type AnalyzerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    /// Pitch-class profile matching
    #[default]
    Chromagram,
    /// Learned model
    NeuralNetwork,
    /// Both, reconciled by confidence
    Hybrid,
}

/// Detection request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoDetectionConfig {
    pub method: DetectionMethod,
    /// 0.0–1.0
    pub sensitivity: f64,
    /// Seconds
    pub min_chord_duration: f64,
    /// Seconds
    pub max_chord_duration: f64,
    /// Detections below this confidence are dropped
    pub confidence_threshold: f64,
}

impl Default for AutoDetectionConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Chromagram,
            sensitivity: 0.5,
            min_chord_duration: 0.5,
            max_chord_duration: 8.0,
            confidence_threshold: 0.6,
        }
    }
}

impl AutoDetectionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(format!("sensitivity {} outside [0, 1]", self.sensitivity));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.min_chord_duration < 0.0 || self.max_chord_duration <= self.min_chord_duration {
            return Err(format!(
                "invalid chord duration range [{}, {}]",
                self.min_chord_duration, self.max_chord_duration
            ));
        }
        Ok(())
    }
}

/// One raw detection from an analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordDetection {
    pub chord_name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
}

/// Everything an analyzer reports for one buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerOutput {
    pub detections: Vec<ChordDetection>,
    pub tempo: Option<f64>,
    pub time_signature: Option<TimeSignature>,
    pub key: Option<String>,
}

/// Pluggable chord recognition strategy
pub trait ChordAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(
        &self,
        audio: &DecodedAudio,
        config: &AutoDetectionConfig,
    ) -> Result<AnalyzerOutput, AnalyzerError>;
}

/// Post-processed analysis, ready to merge into a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysisResult {
    /// Sorted by start time, all `source: automatic`
    pub chord_mappings: Vec<ChordMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Duration-weighted mean confidence (0 when empty)
    pub average_confidence: f64,
    pub processing_time_ms: u64,
}

/// Gap (seconds) under which two detections of the same chord are merged
const MERGE_GAP: f64 = 0.05;

/// Turn raw detections into automatic chord mappings
///
/// In order: drop detections below the confidence threshold (and empty
/// ranges), sort, merge adjacent identical chords, clamp each duration to
/// the maximum, drop those shorter than the minimum.
pub fn post_process(detections: Vec<ChordDetection>, config: &AutoDetectionConfig) -> Vec<ChordMapping> {
    let mut kept: Vec<ChordDetection> = detections
        .into_iter()
        .filter(|d| d.confidence >= config.confidence_threshold)
        .filter(|d| d.start_time >= 0.0 && d.end_time > d.start_time)
        .collect();
    kept.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut merged: Vec<ChordDetection> = Vec::with_capacity(kept.len());
    for detection in kept {
        match merged.last_mut() {
            Some(prev)
                if prev.chord_name == detection.chord_name
                    && detection.start_time <= prev.end_time + MERGE_GAP =>
            {
                let prev_len = prev.end_time - prev.start_time;
                let next_len = detection.end_time - detection.start_time;
                prev.confidence = (prev.confidence * prev_len + detection.confidence * next_len)
                    / (prev_len + next_len);
                prev.end_time = prev.end_time.max(detection.end_time);
            }
            _ => merged.push(detection),
        }
    }

    merged
        .into_iter()
        .map(|mut d| {
            d.end_time = d.end_time.min(d.start_time + config.max_chord_duration);
            d
        })
        .filter(|d| d.end_time - d.start_time >= config.min_chord_duration)
        .map(|d| {
            ChordMapping::automatic(d.chord_name, d.start_time, d.end_time, d.confidence.clamp(0.0, 1.0))
        })
        .collect()
}

/// Duration-weighted mean confidence of automatic mappings
pub fn average_confidence(mappings: &[ChordMapping]) -> f64 {
    let total: f64 = mappings.iter().map(|m| m.duration()).sum();
    if total <= 0.0 {
        return 0.0;
    }
    mappings
        .iter()
        .map(|m| m.confidence.unwrap_or(0.0) * m.duration())
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chordsync_common::timeline::MappingSource;

    fn det(name: &str, start: f64, end: f64, confidence: f64) -> ChordDetection {
        ChordDetection {
            chord_name: name.to_string(),
            start_time: start,
            end_time: end,
            confidence,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AutoDetectionConfig::default().validate().is_ok());
        let bad = AutoDetectionConfig {
            min_chord_duration: 4.0,
            max_chord_duration: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_threshold_and_min_duration() {
        let config = AutoDetectionConfig::default();
        let out = post_process(
            vec![
                det("C", 0.0, 2.0, 0.9),
                det("F", 2.0, 4.0, 0.3),
                det("G", 4.0, 4.2, 0.95),
            ],
            &config,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chord_name, "C");
        assert_eq!(out[0].source, MappingSource::Automatic);
        assert_eq!(out[0].confidence, Some(0.9));
    }

    #[test]
    fn test_merges_adjacent_identical_chords() {
        let config = AutoDetectionConfig::default();
        let out = post_process(
            vec![det("Am", 1.0, 2.0, 0.8), det("Am", 0.0, 1.0, 1.0), det("E", 2.0, 3.0, 0.7)],
            &config,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chord_name, "Am");
        assert_eq!(out[0].start_time, 0.0);
        assert_eq!(out[0].end_time, 2.0);
        assert!((out[0].confidence.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(out[1].chord_name, "E");
    }

    #[test]
    fn test_clamps_to_max_duration() {
        let config = AutoDetectionConfig {
            max_chord_duration: 3.0,
            ..Default::default()
        };
        let out = post_process(vec![det("D", 1.0, 20.0, 0.9)], &config);
        assert_eq!(out[0].end_time, 4.0);
    }

    #[test]
    fn test_average_confidence_weighted() {
        let mappings = vec![
            ChordMapping::automatic("C", 0.0, 3.0, 1.0),
            ChordMapping::automatic("G", 3.0, 4.0, 0.6),
        ];
        assert!((average_confidence(&mappings) - 0.9).abs() < 1e-9);
        assert_eq!(average_confidence(&[]), 0.0);
    }
}
