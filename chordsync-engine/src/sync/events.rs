//! Synchronization events

use chordsync_common::events::NamedEvent;
use chordsync_common::timeline::{ChordMapping, LoopSection, Marker};
use serde::{Deserialize, Serialize};

use super::analysis::AudioAnalysisResult;
use crate::error::SyncError;

/// A single timeline annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Annotation {
    Chord(ChordMapping),
    Marker(Marker),
}

impl Annotation {
    pub fn id(&self) -> &str {
        match self {
            Annotation::Chord(chord) => &chord.id,
            Annotation::Marker(marker) => &marker.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Highlighted chord changed; `chord: None` means back to idle
    ChordChange {
        chord: Option<ChordMapping>,
        next_chord: Option<ChordMapping>,
        position: f64,
    },

    MarkerReached { marker: Marker, position: f64 },

    /// Caller should seek to `section.start_time`
    LoopStart { section: LoopSection },

    LoopEnd { section: LoopSection },

    TimelineLoaded {
        timeline_id: String,
        audio_source_id: String,
        chord_count: usize,
        marker_count: usize,
    },

    AnnotationAdded { annotation: Annotation },

    AnnotationUpdated { annotation: Annotation },

    AnnotationRemoved { annotation: Annotation },

    AnalysisComplete { result: AudioAnalysisResult },

    Error { error: SyncError },
}

impl NamedEvent for SyncEvent {
    fn event_name(&self) -> &'static str {
        match self {
            SyncEvent::ChordChange { .. } => "sync:chordchange",
            SyncEvent::MarkerReached { .. } => "sync:markerreached",
            SyncEvent::LoopStart { .. } => "sync:loopstart",
            SyncEvent::LoopEnd { .. } => "sync:loopend",
            SyncEvent::TimelineLoaded { .. } => "sync:timelineloaded",
            SyncEvent::AnnotationAdded { .. } => "sync:annotationadded",
            SyncEvent::AnnotationUpdated { .. } => "sync:annotationupdated",
            SyncEvent::AnnotationRemoved { .. } => "sync:annotationremoved",
            SyncEvent::AnalysisComplete { .. } => "sync:analysiscomplete",
            SyncEvent::Error { .. } => "sync:error",
        }
    }
}
