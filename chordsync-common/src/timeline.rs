//! Timeline data model
//!
//! A [`Timeline`] is the annotation aggregate for exactly one audio source:
//! chord mappings, tempo mappings, section markers and loop sections, plus
//! free-form song metadata. Field names serialize in camelCase so the JSON
//! shape matches what external stores and editors exchange.
//!
//! Times are in seconds from the start of the audio source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// An addressable audio asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Nominal duration in seconds (0 when unknown)
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl AudioSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: String::new(),
            artist: None,
            duration: 0.0,
            format: None,
            quality: None,
        }
    }

    /// Lowercased file extension of the URL, used as a decoder hint
    pub fn extension_hint(&self) -> Option<String> {
        if let Some(format) = &self.format {
            return Some(format.to_lowercase());
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        file.rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Who created a chord mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Manual,
    Automatic,
}

/// A chord name anchored to a time range of the audio
///
/// The chord name is free-form; it is not validated against a chord grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordMapping {
    pub id: String,
    pub chord_name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub source: MappingSource,
    /// 0–1, required when `source` is automatic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub verified: bool,
}

impl ChordMapping {
    /// New manual mapping with a generated id
    pub fn manual(chord_name: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chord_name: chord_name.into(),
            start_time,
            end_time,
            source: MappingSource::Manual,
            confidence: None,
            verified: false,
        }
    }

    /// New automatic mapping with a generated id
    pub fn automatic(
        chord_name: impl Into<String>,
        start_time: f64,
        end_time: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chord_name: chord_name.into(),
            start_time,
            end_time,
            source: MappingSource::Automatic,
            confidence: Some(confidence),
            verified: false,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Check the mapping's own invariants
    pub fn validate(&self) -> Result<()> {
        if !self.start_time.is_finite() || !self.end_time.is_finite() {
            return Err(Error::InvalidTimeline(format!(
                "chord mapping {} has a non-finite range [{}, {}]",
                self.id, self.start_time, self.end_time
            )));
        }
        if self.start_time < 0.0 {
            return Err(Error::InvalidTimeline(format!(
                "chord mapping {} starts before 0 ({})",
                self.id, self.start_time
            )));
        }
        if self.end_time <= self.start_time {
            return Err(Error::InvalidTimeline(format!(
                "chord mapping {} ends at {} which is not after its start {}",
                self.id, self.end_time, self.start_time
            )));
        }
        match (self.source, self.confidence) {
            (MappingSource::Automatic, None) => Err(Error::InvalidTimeline(format!(
                "automatic chord mapping {} has no confidence",
                self.id
            ))),
            (_, Some(c)) if !(0.0..=1.0).contains(&c) => Err(Error::InvalidTimeline(format!(
                "chord mapping {} confidence {} outside [0, 1]",
                self.id, c
            ))),
            _ => Ok(()),
        }
    }
}

/// Time signature such as 4/4 or 6/8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const fn common_time() -> Self {
        Self::new(4, 4)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::common_time()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Tempo in effect from `start_time` (until `end_time` or the next mapping)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoMapping {
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    pub bpm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
}

/// Section type of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerType {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Solo,
    Outro,
    Custom,
}

impl fmt::Display for MarkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkerType::Intro => "intro",
            MarkerType::Verse => "verse",
            MarkerType::Chorus => "chorus",
            MarkerType::Bridge => "bridge",
            MarkerType::Solo => "solo",
            MarkerType::Outro => "outro",
            MarkerType::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A labelled point in time (section start, cue, note to self)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub time: f64,
    pub label: String,
    #[serde(rename = "type")]
    pub marker_type: MarkerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Marker {
    pub fn new(time: f64, label: impl Into<String>, marker_type: MarkerType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time,
            label: label.into(),
            marker_type,
            color: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.time.is_finite() || self.time < 0.0 {
            return Err(Error::InvalidTimeline(format!(
                "marker {} has invalid time {}",
                self.id, self.time
            )));
        }
        Ok(())
    }
}

/// A practice loop region
///
/// `repeat_count: None` means loop forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub enabled: bool,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<u32>,
}

impl LoopSection {
    pub fn new(start_time: f64, end_time: f64, repeat_count: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            enabled: true,
            start_time,
            end_time,
            repeat_count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.start_time.is_finite()
            || !self.end_time.is_finite()
            || self.start_time < 0.0
            || self.end_time <= self.start_time
        {
            return Err(Error::InvalidTimeline(format!(
                "loop section {} has invalid range [{}, {}]",
                self.id, self.start_time, self.end_time
            )));
        }
        Ok(())
    }
}

/// Free-form song metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
}

/// Annotation aggregate for one audio source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub id: String,
    pub audio_source_id: String,
    #[serde(default)]
    pub chord_mappings: Vec<ChordMapping>,
    #[serde(default)]
    pub tempo_mappings: Vec<TempoMapping>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub loop_sections: Vec<LoopSection>,
    #[serde(default)]
    pub metadata: TimelineMetadata,
    #[serde(default = "default_version")]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Timeline {
    /// Empty timeline for an audio source
    pub fn new(audio_source_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            audio_source_id: audio_source_id.into(),
            chord_mappings: Vec::new(),
            tempo_mappings: Vec::new(),
            markers: Vec::new(),
            loop_sections: Vec::new(),
            metadata: TimelineMetadata::default(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse a timeline from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let mut timeline: Timeline = serde_json::from_str(json)?;
        timeline.validate()?;
        timeline.sort_chords();
        timeline.sort_markers();
        Ok(timeline)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every invariant of the aggregate
    ///
    /// Rejects a missing id or audio source id, any chord mapping whose
    /// range is empty/inverted or starts before zero, any marker with a
    /// negative time, and any loop section with an invalid range.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidTimeline("timeline id is missing".to_string()));
        }
        if self.audio_source_id.trim().is_empty() {
            return Err(Error::InvalidTimeline(
                "timeline audioSourceId is missing".to_string(),
            ));
        }
        for mapping in &self.chord_mappings {
            mapping.validate()?;
        }
        for marker in &self.markers {
            marker.validate()?;
        }
        for section in &self.loop_sections {
            section.validate()?;
        }
        Ok(())
    }

    /// Stable sort of chord mappings by start time
    pub fn sort_chords(&mut self) {
        self.chord_mappings
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }

    /// Stable sort of markers by time
    pub fn sort_markers(&mut self) {
        self.markers.sort_by(|a, b| a.time.total_cmp(&b.time));
    }

    /// Refresh `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn chord(&self, id: &str) -> Option<&ChordMapping> {
        self.chord_mappings.iter().find(|m| m.id == id)
    }

    pub fn marker(&self, id: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    /// Tempo (bpm) in effect at `time`
    ///
    /// Latest tempo mapping starting at or before `time` whose optional end
    /// has not passed; falls back to `metadata.tempo`.
    pub fn tempo_at(&self, time: f64) -> Option<f64> {
        self.tempo_mappings
            .iter()
            .filter(|t| t.start_time <= time && t.end_time.map_or(true, |end| time < end))
            .max_by(|a, b| a.start_time.total_cmp(&b.start_time))
            .map(|t| t.bpm)
            .or(self.metadata.tempo)
    }
}
