//! Synchronization engine
//!
//! Resolves playback positions against the loaded timeline. Each call to
//! [`SyncEngine::update_position`] runs to completion before the next one,
//! in this order:
//!
//! 1. chord resolution (`idle <-> highlighting`)
//! 2. marker firing
//! 3. loop boundary handling (practice mode only)
//!
//! The tolerance window compensates for the coarse polling cadence of the
//! playback driver.

use chordsync_common::events::EventBus;
use chordsync_common::time::ms_to_secs;
use chordsync_common::timeline::{ChordMapping, LoopSection, MappingSource, Marker, Timeline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::analysis::{average_confidence, post_process, AudioAnalysisResult, AutoDetectionConfig, ChordAnalyzer};
use super::events::{Annotation, SyncEvent};
use super::timeline_store::TimelineStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncErrorCode};
use crate::playback::DecodedAudio;

/// Derived synchronization state, recomputed on every position update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_enabled: bool,
    pub is_highlighting: bool,
    /// Last position fed in, drift compensation applied (seconds)
    pub sync_position: f64,
    /// Wall-clock time of the last position update
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Seconds added to every incoming position
    pub drift_compensation: f64,
    pub current_chord: Option<ChordMapping>,
    pub next_chord: Option<ChordMapping>,
    pub is_annotating: bool,
    pub practice_mode: bool,
}

impl SyncState {
    fn new(practice_mode: bool) -> Self {
        Self {
            is_enabled: true,
            is_highlighting: false,
            sync_position: 0.0,
            last_sync_time: None,
            drift_compensation: 0.0,
            current_chord: None,
            next_chord: None,
            is_annotating: false,
            practice_mode,
        }
    }
}

/// Mapping with the latest start whose window `[start - tol, end + tol]`
/// contains `position`
pub fn resolve_chord(mappings: &[ChordMapping], position: f64, tolerance: f64) -> Option<&ChordMapping> {
    mappings
        .iter()
        .filter(|m| m.start_time - tolerance <= position && position <= m.end_time + tolerance)
        .max_by(|a, b| a.start_time.total_cmp(&b.start_time))
}

/// First mapping starting strictly after `position` (mappings sorted)
pub fn next_chord_after(mappings: &[ChordMapping], position: f64) -> Option<&ChordMapping> {
    mappings.iter().find(|m| m.start_time > position)
}

/// Markers whose time lies in `[position - tol, position]`
pub fn markers_in_window(markers: &[Marker], position: f64, tolerance: f64) -> impl Iterator<Item = &Marker> {
    markers
        .iter()
        .filter(move |m| position - tolerance <= m.time && m.time <= position)
}

pub struct SyncEngine {
    config: SyncConfig,
    store: TimelineStore,
    state: SyncState,
    events: EventBus<SyncEvent>,
    loop_section: Option<LoopSection>,
    /// Cleared when the loop end fires; set again once the position is
    /// back below the end
    loop_armed: bool,
    /// Marker ids inside their window on the previous tick (edge mode)
    markers_inside: HashSet<String>,
    pending_annotation_start: Option<f64>,
    destroyed: bool,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let state = SyncState::new(config.practice_mode);
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            store: TimelineStore::new(),
            state,
            loop_section: None,
            loop_armed: true,
            markers_inside: HashSet::new(),
            pending_annotation_start: None,
            destroyed: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.store.timeline()
    }

    pub fn loop_section(&self) -> Option<&LoopSection> {
        self.loop_section.as_ref()
    }

    fn tolerance(&self) -> f64 {
        ms_to_secs(self.config.tolerance_ms)
    }

    pub fn enable(&mut self) {
        self.state.is_enabled = true;
    }

    /// Position updates are ignored until [`enable`](Self::enable)
    pub fn disable(&mut self) {
        self.state.is_enabled = false;
    }

    pub fn set_drift_compensation(&mut self, seconds: f64) {
        self.state.drift_compensation = seconds;
    }

    /// Replace the active loop section (no merge with the previous one)
    pub fn set_loop_section(&mut self, section: Option<LoopSection>) {
        if let Some(s) = &section {
            debug!("Loop section set: [{:.2}, {:.2}] repeat {:?}", s.start_time, s.end_time, s.repeat_count);
        }
        self.loop_section = section;
        self.loop_armed = true;
    }

    fn handle_error(&self, err: SyncError) -> SyncError {
        warn!(code = %err.code, "Sync error: {}", err.message);
        self.events.emit_lossy(SyncEvent::Error { error: err.clone() });
        err
    }

    /// Re-resolve the current and next chord after the chord list changed
    ///
    /// Only runs once a position has been fed in.
    fn refresh_chords(&mut self) {
        if self.state.last_sync_time.is_none() {
            return;
        }
        let position = self.state.sync_position;
        if let Some(timeline) = self.store.timeline() {
            let fresh = self
                .state
                .current_chord
                .as_ref()
                .and_then(|c| timeline.chord(&c.id))
                .cloned();
            if fresh.is_some() {
                self.state.current_chord = fresh;
            }
        }
        self.resolve_chords(position);
        self.state.next_chord = self
            .store
            .timeline()
            .and_then(|t| next_chord_after(&t.chord_mappings, position))
            .cloned();
    }

    fn reset_resolution(&mut self) {
        self.state.is_highlighting = false;
        self.state.current_chord = None;
        self.state.next_chord = None;
        self.markers_inside.clear();
        self.loop_armed = true;
    }

    // ===== Timeline store =====

    fn loaded_event(timeline: &Timeline) -> SyncEvent {
        info!(
            "Timeline {} loaded ({} chords, {} markers)",
            timeline.id,
            timeline.chord_mappings.len(),
            timeline.markers.len()
        );
        SyncEvent::TimelineLoaded {
            timeline_id: timeline.id.clone(),
            audio_source_id: timeline.audio_source_id.clone(),
            chord_count: timeline.chord_mappings.len(),
            marker_count: timeline.markers.len(),
        }
    }

    /// Replace the loaded timeline wholesale
    pub fn load_timeline(&mut self, timeline: Timeline) {
        let event = Self::loaded_event(&timeline);
        self.store.load(timeline);
        self.reset_resolution();
        self.events.emit_lossy(event);
    }

    /// Copy of the loaded timeline with `version + 1`
    pub fn export_timeline(&self) -> Option<Timeline> {
        self.store.export()
    }

    /// Validate, then load
    ///
    /// On failure the previously loaded timeline stays in place.
    pub fn import_timeline(&mut self, timeline: Timeline) -> Result<(), SyncError> {
        let id = timeline.id.clone();
        let (chords, markers) = (timeline.chord_mappings.len(), timeline.markers.len());
        let audio_source_id = timeline.audio_source_id.clone();
        if let Err(e) = self.store.import(timeline) {
            return Err(self.handle_error(e));
        }
        info!("Timeline {} imported ({} chords, {} markers)", id, chords, markers);
        self.reset_resolution();
        self.events.emit_lossy(SyncEvent::TimelineLoaded {
            timeline_id: id,
            audio_source_id,
            chord_count: chords,
            marker_count: markers,
        });
        Ok(())
    }

    /// Parse a JSON document, validate, then load
    pub fn import_timeline_json(&mut self, json: &str) -> Result<(), SyncError> {
        match serde_json::from_str::<Timeline>(json) {
            Ok(timeline) => self.import_timeline(timeline),
            Err(e) => {
                let err = SyncError::new(SyncErrorCode::ImportFailed, "Timeline JSON is malformed").with_cause(e);
                Err(self.handle_error(err))
            }
        }
    }

    /// Create and add a manual chord mapping
    pub fn add_chord_mapping(
        &mut self,
        chord_name: impl Into<String>,
        start_time: f64,
        end_time: f64,
    ) -> Result<ChordMapping, SyncError> {
        self.add_chord(ChordMapping::manual(chord_name, start_time, end_time))
    }

    pub fn add_chord(&mut self, mapping: ChordMapping) -> Result<ChordMapping, SyncError> {
        match self.store.add_chord(mapping) {
            Ok(added) => {
                self.events.emit_lossy(SyncEvent::AnnotationAdded {
                    annotation: Annotation::Chord(added.clone()),
                });
                self.refresh_chords();
                Ok(added)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    pub fn update_chord_mapping(&mut self, mapping: ChordMapping) -> Result<ChordMapping, SyncError> {
        match self.store.update_chord(mapping) {
            Ok(updated) => {
                self.events.emit_lossy(SyncEvent::AnnotationUpdated {
                    annotation: Annotation::Chord(updated.clone()),
                });
                self.refresh_chords();
                Ok(updated)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    pub fn remove_chord_mapping(&mut self, id: &str) -> Result<ChordMapping, SyncError> {
        match self.store.remove_chord(id) {
            Ok(removed) => {
                self.events.emit_lossy(SyncEvent::AnnotationRemoved {
                    annotation: Annotation::Chord(removed.clone()),
                });
                self.refresh_chords();
                Ok(removed)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    pub fn add_marker(&mut self, marker: Marker) -> Result<Marker, SyncError> {
        match self.store.add_marker(marker) {
            Ok(added) => {
                self.events.emit_lossy(SyncEvent::AnnotationAdded {
                    annotation: Annotation::Marker(added.clone()),
                });
                Ok(added)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    pub fn update_marker(&mut self, marker: Marker) -> Result<Marker, SyncError> {
        match self.store.update_marker(marker) {
            Ok(updated) => {
                self.events.emit_lossy(SyncEvent::AnnotationUpdated {
                    annotation: Annotation::Marker(updated.clone()),
                });
                Ok(updated)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    pub fn remove_marker(&mut self, id: &str) -> Result<Marker, SyncError> {
        match self.store.remove_marker(id) {
            Ok(removed) => {
                self.markers_inside.remove(&removed.id);
                self.events.emit_lossy(SyncEvent::AnnotationRemoved {
                    annotation: Annotation::Marker(removed.clone()),
                });
                Ok(removed)
            }
            Err(e) => Err(self.handle_error(e)),
        }
    }

    // ===== Position resolution =====

    /// Feed one playback position (seconds)
    pub fn update_position(&mut self, position: f64) {
        if !self.state.is_enabled {
            return;
        }
        let position = position + self.state.drift_compensation;
        self.state.sync_position = position;
        self.state.last_sync_time = Some(Utc::now());

        self.resolve_chords(position);
        self.fire_markers(position);
        self.handle_loop(position);
    }

    fn resolve_chords(&mut self, position: f64) {
        let tolerance = self.tolerance();
        let Some(timeline) = self.store.timeline() else {
            return;
        };
        let matched = resolve_chord(&timeline.chord_mappings, position, tolerance).cloned();
        let next = next_chord_after(&timeline.chord_mappings, position).cloned();

        let current_id = self.state.current_chord.as_ref().map(|c| c.id.as_str());
        match matched {
            Some(chord) if current_id != Some(chord.id.as_str()) => {
                debug!("Chord {} at {:.3}s", chord.chord_name, position);
                self.state.is_highlighting = true;
                self.state.current_chord = Some(chord.clone());
                self.state.next_chord = next.clone();
                self.events.emit_lossy(SyncEvent::ChordChange {
                    chord: Some(chord),
                    next_chord: next,
                    position,
                });
            }
            None if self.state.is_highlighting => {
                debug!("No chord at {:.3}s", position);
                self.state.is_highlighting = false;
                self.state.current_chord = None;
                self.state.next_chord = next.clone();
                self.events.emit_lossy(SyncEvent::ChordChange {
                    chord: None,
                    next_chord: next,
                    position,
                });
            }
            _ => {}
        }
    }

    fn fire_markers(&mut self, position: f64) {
        let tolerance = self.tolerance();
        let Some(timeline) = self.store.timeline() else {
            return;
        };
        let in_window: Vec<Marker> = markers_in_window(&timeline.markers, position, tolerance)
            .cloned()
            .collect();

        if self.config.edge_triggered_markers {
            let inside: HashSet<String> = in_window.iter().map(|m| m.id.clone()).collect();
            for marker in in_window {
                if !self.markers_inside.contains(&marker.id) {
                    self.events.emit_lossy(SyncEvent::MarkerReached { marker, position });
                }
            }
            self.markers_inside = inside;
        } else {
            for marker in in_window {
                self.events.emit_lossy(SyncEvent::MarkerReached { marker, position });
            }
        }
    }

    fn handle_loop(&mut self, position: f64) {
        if !self.state.practice_mode {
            return;
        }
        let Some(section) = self.loop_section.as_mut() else {
            return;
        };
        if !section.enabled {
            return;
        }

        if position < section.end_time {
            self.loop_armed = true;
            return;
        }
        if !self.loop_armed {
            return;
        }
        self.loop_armed = false;

        self.events.emit_lossy(SyncEvent::LoopEnd {
            section: section.clone(),
        });

        let repeat = match section.repeat_count {
            None => true,
            Some(0) => false,
            Some(n) => {
                section.repeat_count = Some(n - 1);
                true
            }
        };
        if repeat {
            debug!("Loop back to {:.2}s (remaining {:?})", section.start_time, section.repeat_count);
            self.events.emit_lossy(SyncEvent::LoopStart {
                section: section.clone(),
            });
        } else {
            debug!("Loop section exhausted at {:.2}s", position);
        }
    }

    // ===== Annotation capture =====

    /// Record the current position as the pending start of a new chord
    pub fn start_annotation(&mut self) -> f64 {
        let start = self.state.sync_position;
        self.pending_annotation_start = Some(start);
        self.state.is_annotating = true;
        start
    }

    /// Leave annotation mode, returning the pending start
    ///
    /// Does not create a mapping; call
    /// [`add_chord_mapping`](Self::add_chord_mapping) with explicit bounds.
    pub fn stop_annotation(&mut self) -> Option<f64> {
        self.state.is_annotating = false;
        self.pending_annotation_start.take()
    }

    pub fn pending_annotation_start(&self) -> Option<f64> {
        self.pending_annotation_start
    }

    // ===== Automatic analysis =====

    /// Run a chord analyzer over a decoded buffer and post-process its output
    ///
    /// # Errors
    /// `SYNC_ANALYSIS_FAILED`, with the analyzer's error (or the config
    /// problem) as cause.
    pub fn analyze_audio(
        &mut self,
        analyzer: &dyn ChordAnalyzer,
        audio: &DecodedAudio,
        config: &AutoDetectionConfig,
    ) -> Result<AudioAnalysisResult, SyncError> {
        if let Err(reason) = config.validate() {
            let err = SyncError::new(SyncErrorCode::AnalysisFailed, "Invalid detection config").with_cause(reason);
            return Err(self.handle_error(err));
        }

        info!("Analyzing {:.1}s of audio with {}", audio.duration(), analyzer.name());
        let started = Instant::now();
        let output = match analyzer.analyze(audio, config) {
            Ok(output) => output,
            Err(e) => {
                let err = SyncError::new(
                    SyncErrorCode::AnalysisFailed,
                    format!("Chord analysis with {} failed", analyzer.name()),
                )
                .with_cause(e);
                return Err(self.handle_error(err));
            }
        };

        let chord_mappings = post_process(output.detections, config);
        let result = AudioAnalysisResult {
            average_confidence: average_confidence(&chord_mappings),
            chord_mappings,
            tempo: output.tempo,
            time_signature: output.time_signature,
            key: output.key,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Analysis complete: {} chords, mean confidence {:.2}",
            result.chord_mappings.len(),
            result.average_confidence
        );
        self.events.emit_lossy(SyncEvent::AnalysisComplete {
            result: result.clone(),
        });
        Ok(result)
    }

    /// Merge analysis output into the loaded timeline
    ///
    /// With `replace`, existing automatic mappings are dropped first;
    /// manual mappings are always kept. Fills in tempo and time signature
    /// metadata when the timeline has none. Returns the number of mappings
    /// added.
    pub fn apply_analysis(&mut self, result: &AudioAnalysisResult, replace: bool) -> Result<usize, SyncError> {
        let added = result.chord_mappings.clone();
        let edit = self.store.edit(|timeline| {
            if replace {
                timeline
                    .chord_mappings
                    .retain(|m| m.source != MappingSource::Automatic);
            }
            timeline.chord_mappings.extend(added.iter().cloned());
            if timeline.metadata.tempo.is_none() {
                timeline.metadata.tempo = result.tempo;
            }
            if timeline.metadata.time_signature.is_none() {
                timeline.metadata.time_signature = result.time_signature;
            }
        });
        if let Err(e) = edit {
            return Err(self.handle_error(e));
        }

        for mapping in &added {
            self.events.emit_lossy(SyncEvent::AnnotationAdded {
                annotation: Annotation::Chord(mapping.clone()),
            });
        }
        self.refresh_chords();
        Ok(added.len())
    }

    /// Clear timeline and state. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.store.clear();
        self.loop_section = None;
        self.pending_annotation_start = None;
        self.reset_resolution();
        self.state = SyncState::new(self.config.practice_mode);
        self.state.is_enabled = false;
        self.destroyed = true;
        info!("Sync engine destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::analysis::{AnalyzerError, AnalyzerOutput, ChordDetection};
    use chordsync_common::events::drain;
    use chordsync_common::timeline::MarkerType;

    fn c_am_timeline() -> Timeline {
        let mut t = Timeline::new("audio");
        t.chord_mappings.push(ChordMapping::manual("C", 0.0, 2.0));
        t.chord_mappings.push(ChordMapping::manual("Am", 2.0, 4.0));
        t
    }

    fn chord_names(events: &[SyncEvent]) -> Vec<Option<String>> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::ChordChange { chord, .. } => Some(chord.as_ref().map(|c| c.chord_name.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_c_am_scenario() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        let mut rx = engine.subscribe();

        for p in [0.0, 1.0, 2.5, 5.0] {
            engine.update_position(p);
        }

        let events = drain(&mut rx);
        assert_eq!(
            chord_names(&events),
            vec![Some("C".to_string()), Some("Am".to_string()), None]
        );
        assert!(!engine.state().is_highlighting);
        assert!(engine.state().current_chord.is_none());
    }

    #[test]
    fn test_next_chord_reported_with_change() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.update_position(0.0);
        assert_eq!(engine.state().next_chord.as_ref().unwrap().chord_name, "Am");
        engine.update_position(2.5);
        assert!(engine.state().next_chord.is_none());
    }

    #[test]
    fn test_tolerance_edges() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut t = Timeline::new("audio");
        t.chord_mappings.push(ChordMapping::manual("D", 1.0, 2.0));
        engine.load_timeline(t);

        engine.update_position(0.96);
        assert_eq!(engine.state().current_chord.as_ref().unwrap().chord_name, "D");
        engine.update_position(2.04);
        assert!(engine.state().is_highlighting);
        engine.update_position(2.06);
        assert!(!engine.state().is_highlighting);
    }

    #[test]
    fn test_overlap_prefers_latest_start() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut t = Timeline::new("audio");
        t.chord_mappings.push(ChordMapping::manual("C", 0.0, 4.0));
        t.chord_mappings.push(ChordMapping::manual("Cmaj7", 1.0, 3.0));
        engine.load_timeline(t);

        engine.update_position(2.0);
        assert_eq!(engine.state().current_chord.as_ref().unwrap().chord_name, "Cmaj7");
    }

    #[test]
    fn test_disabled_ignores_updates() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.disable();
        engine.update_position(1.0);
        assert!(engine.state().current_chord.is_none());
        engine.enable();
        engine.update_position(1.0);
        assert!(engine.state().current_chord.is_some());
    }

    #[test]
    fn test_drift_compensation_applied() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.set_drift_compensation(0.5);
        engine.update_position(1.75);
        assert_eq!(engine.state().sync_position, 2.25);
        assert_eq!(engine.state().current_chord.as_ref().unwrap().chord_name, "Am");
    }

    #[test]
    fn test_markers_level_triggered() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut t = c_am_timeline();
        t.markers.push(Marker::new(1.0, "Verse", MarkerType::Verse));
        engine.load_timeline(t);
        let mut rx = engine.subscribe();

        engine.update_position(1.0);
        engine.update_position(1.02);
        engine.update_position(1.2);

        let reached = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::MarkerReached { .. }))
            .count();
        assert_eq!(reached, 2);
    }

    #[test]
    fn test_markers_edge_triggered() {
        let config = SyncConfig {
            edge_triggered_markers: true,
            ..Default::default()
        };
        let mut engine = SyncEngine::new(config);
        let mut t = c_am_timeline();
        t.markers.push(Marker::new(1.0, "Verse", MarkerType::Verse));
        engine.load_timeline(t);
        let mut rx = engine.subscribe();

        engine.update_position(1.0);
        engine.update_position(1.02);
        engine.update_position(1.2);
        engine.update_position(1.01);

        let reached = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::MarkerReached { .. }))
            .count();
        assert_eq!(reached, 2);
    }

    #[test]
    fn test_loop_repeats_then_exhausts() {
        let config = SyncConfig {
            practice_mode: true,
            ..Default::default()
        };
        let mut engine = SyncEngine::new(config);
        engine.load_timeline(c_am_timeline());
        engine.set_loop_section(Some(LoopSection::new(1.0, 3.0, Some(1))));
        let mut rx = engine.subscribe();

        engine.update_position(2.9);
        engine.update_position(3.0);
        engine.update_position(3.1);
        engine.update_position(1.0);
        engine.update_position(3.0);

        let loops: Vec<&str> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                SyncEvent::LoopEnd { .. } => Some("end"),
                SyncEvent::LoopStart { .. } => Some("start"),
                _ => None,
            })
            .collect();
        assert_eq!(loops, vec!["end", "start", "end"]);
        assert_eq!(engine.loop_section().unwrap().repeat_count, Some(0));
    }

    #[test]
    fn test_loop_ignored_outside_practice_mode() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.set_loop_section(Some(LoopSection::new(0.0, 1.0, None)));
        let mut rx = engine.subscribe();
        engine.update_position(1.5);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_annotation_capture() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(Timeline::new("audio"));
        engine.update_position(3.25);

        assert_eq!(engine.start_annotation(), 3.25);
        assert!(engine.state().is_annotating);
        assert_eq!(engine.stop_annotation(), Some(3.25));
        assert!(!engine.state().is_annotating);
        assert!(engine.timeline().unwrap().chord_mappings.is_empty());

        let mut rx = engine.subscribe();
        engine.add_chord_mapping("E7", 3.25, 4.0).unwrap();
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SyncEvent::AnnotationAdded { .. }]
        ));
    }

    #[test]
    fn test_import_failure_emits_error() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut rx = engine.subscribe();
        let err = engine.import_timeline_json("{not json").unwrap_err();
        assert_eq!(err.code, SyncErrorCode::ImportFailed);
        assert!(matches!(drain(&mut rx).as_slice(), [SyncEvent::Error { .. }]));
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut t = c_am_timeline();
        t.markers.push(Marker::new(0.0, "Intro", MarkerType::Intro));
        t.loop_sections.push(LoopSection::new(0.0, 2.0, None));
        engine.load_timeline(t);
        let before = engine.timeline().unwrap().clone();

        let exported = engine.export_timeline().unwrap();
        engine.import_timeline(exported).unwrap();
        let after = engine.timeline().unwrap();

        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.chord_mappings, before.chord_mappings);
        assert_eq!(after.markers, before.markers);
        assert_eq!(after.loop_sections, before.loop_sections);
    }

    struct FixedAnalyzer(Vec<ChordDetection>);

    impl ChordAnalyzer for FixedAnalyzer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn analyze(&self, _audio: &DecodedAudio, _config: &AutoDetectionConfig) -> Result<AnalyzerOutput, AnalyzerError> {
            Ok(AnalyzerOutput {
                detections: self.0.clone(),
                tempo: Some(100.0),
                ..Default::default()
            })
        }
    }

    struct FailingAnalyzer;

    impl ChordAnalyzer for FailingAnalyzer {
        fn name(&self) -> &str {
            "failing"
        }

        fn analyze(&self, _audio: &DecodedAudio, _config: &AutoDetectionConfig) -> Result<AnalyzerOutput, AnalyzerError> {
            Err("model file missing".into())
        }
    }

    fn silence() -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.0; 1000],
            sample_rate: 1000,
            channels: 1,
        }
    }

    #[test]
    fn test_analysis_failure_is_typed() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let err = engine
            .analyze_audio(&FailingAnalyzer, &silence(), &AutoDetectionConfig::default())
            .unwrap_err();
        assert_eq!(err.code, SyncErrorCode::AnalysisFailed);
        assert_eq!(err.cause.as_deref(), Some("model file missing"));
    }

    #[test]
    fn test_apply_analysis_replaces_automatic_only() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        let mut t = Timeline::new("audio");
        t.chord_mappings.push(ChordMapping::manual("C", 0.0, 1.0));
        t.chord_mappings.push(ChordMapping::automatic("X", 5.0, 6.0, 0.9));
        engine.load_timeline(t);

        let analyzer = FixedAnalyzer(vec![ChordDetection {
            chord_name: "G".to_string(),
            start_time: 2.0,
            end_time: 3.0,
            confidence: 0.8,
        }]);
        let result = engine
            .analyze_audio(&analyzer, &silence(), &AutoDetectionConfig::default())
            .unwrap();
        assert_eq!(engine.apply_analysis(&result, true).unwrap(), 1);

        let timeline = engine.timeline().unwrap();
        let names: Vec<_> = timeline.chord_mappings.iter().map(|m| m.chord_name.as_str()).collect();
        assert_eq!(names, vec!["C", "G"]);
        assert_eq!(timeline.chord_mappings[1].source, MappingSource::Automatic);
        assert_eq!(timeline.metadata.tempo, Some(100.0));
    }

    #[test]
    fn test_removing_current_chord_clears_highlight() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.update_position(1.0);
        let c_id = engine.state().current_chord.as_ref().unwrap().id.clone();
        let mut rx = engine.subscribe();

        engine.remove_chord_mapping(&c_id).unwrap();

        assert!(!engine.state().is_highlighting);
        assert!(engine.state().current_chord.is_none());
        assert_eq!(chord_names(&drain(&mut rx)), vec![None]);
        assert_eq!(engine.state().next_chord.as_ref().unwrap().chord_name, "Am");
    }

    #[test]
    fn test_updating_current_chord_refreshes_state() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.update_position(1.0);
        let mut renamed = engine.state().current_chord.clone().unwrap();
        renamed.chord_name = "Cmaj7".to_string();
        engine.update_chord_mapping(renamed.clone()).unwrap();
        assert_eq!(engine.state().current_chord.as_ref().unwrap().chord_name, "Cmaj7");

        // moved away from the playhead
        renamed.start_time = 5.0;
        renamed.end_time = 6.0;
        let mut rx = engine.subscribe();
        engine.update_chord_mapping(renamed).unwrap();
        assert!(engine.state().current_chord.is_none());
        assert_eq!(chord_names(&drain(&mut rx)), vec![None]);
    }

    #[test]
    fn test_adding_chord_under_playhead_highlights_it() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(Timeline::new("audio"));
        engine.update_position(3.0);
        assert!(engine.state().current_chord.is_none());

        let mut rx = engine.subscribe();
        engine.add_chord_mapping("G", 2.0, 4.0).unwrap();
        engine.add_chord_mapping("D", 4.0, 6.0).unwrap();

        assert_eq!(engine.state().current_chord.as_ref().unwrap().chord_name, "G");
        assert_eq!(engine.state().next_chord.as_ref().unwrap().chord_name, "D");
        assert_eq!(chord_names(&drain(&mut rx)), vec![Some("G".to_string())]);
    }

    #[test]
    fn test_edits_before_first_position_do_not_resolve() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(Timeline::new("audio"));
        engine.add_chord_mapping("G", 0.0, 4.0).unwrap();
        assert!(engine.state().current_chord.is_none());
    }

    #[test]
    fn test_non_finite_chord_is_rejected() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.import_timeline(c_am_timeline()).unwrap();

        assert!(engine.add_chord_mapping("G", f64::NAN, 1.0).is_err());
        assert!(engine.add_chord_mapping("G", 4.0, f64::INFINITY).is_err());
        assert_eq!(engine.timeline().unwrap().chord_mappings.len(), 2);
    }

    #[test]
    fn test_destroy_clears_disabled_engine() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.disable();
        engine.set_loop_section(Some(LoopSection::new(0.0, 2.0, None)));
        engine.start_annotation();

        engine.destroy();

        assert!(engine.loop_section().is_none());
        assert!(engine.pending_annotation_start().is_none());
        assert!(!engine.state().is_annotating);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut engine = SyncEngine::new(SyncConfig::default());
        engine.load_timeline(c_am_timeline());
        engine.destroy();
        engine.destroy();
        assert!(engine.timeline().is_none());
        engine.update_position(1.0);
        assert!(engine.state().current_chord.is_none());
    }
}
