//! Synchronization engine and timeline store
//!
//! [`SyncEngine`] owns the loaded timeline (through [`TimelineStore`]) and
//! turns playback positions into chord, marker and loop events.

pub mod analysis;
pub mod engine;
pub mod events;
pub mod timeline_store;

pub use analysis::{
    AnalyzerError, AnalyzerOutput, AudioAnalysisResult, AutoDetectionConfig, ChordAnalyzer, ChordDetection,
    DetectionMethod,
};
pub use engine::{SyncEngine, SyncState};
pub use events::{Annotation, SyncEvent};
pub use timeline_store::TimelineStore;
