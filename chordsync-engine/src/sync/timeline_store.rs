//! Timeline store
//!
//! Holds the single loaded [`Timeline`] and is its only sanctioned writer.
//! Chord mappings stay sorted by start time and markers by time after every
//! mutation, and every mutation bumps `updated_at`.
//!
//! Events are emitted by the owning [`SyncEngine`](super::SyncEngine), not
//! here.

use chordsync_common::timeline::{ChordMapping, Marker, Timeline};

use crate::error::{SyncError, SyncErrorCode};

#[derive(Debug, Default)]
pub struct TimelineStore {
    timeline: Option<Timeline>,
}

fn annotation_error(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::AnnotationFailed, message)
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    /// Replace the loaded timeline wholesale (no validation)
    pub fn load(&mut self, mut timeline: Timeline) {
        timeline.sort_chords();
        timeline.sort_markers();
        self.timeline = Some(timeline);
    }

    pub fn clear(&mut self) {
        self.timeline = None;
    }

    /// Copy of the loaded timeline with `version + 1` and a fresh `updated_at`
    ///
    /// The stored timeline keeps its version.
    pub fn export(&self) -> Option<Timeline> {
        self.timeline.as_ref().map(|t| {
            let mut copy = t.clone();
            copy.version = copy.version.saturating_add(1);
            copy.touch();
            copy
        })
    }

    /// Validate, then load
    ///
    /// # Errors
    /// `SYNC_IMPORT_FAILED` carrying the validation message as cause. The
    /// previously loaded timeline is kept.
    pub fn import(&mut self, timeline: Timeline) -> Result<(), SyncError> {
        timeline.validate().map_err(|e| {
            SyncError::new(SyncErrorCode::ImportFailed, "Timeline failed validation").with_cause(e)
        })?;
        self.load(timeline);
        Ok(())
    }

    fn loaded_mut(&mut self) -> Result<&mut Timeline, SyncError> {
        self.timeline
            .as_mut()
            .ok_or_else(|| annotation_error("No timeline loaded"))
    }

    pub fn add_chord(&mut self, mapping: ChordMapping) -> Result<ChordMapping, SyncError> {
        mapping
            .validate()
            .map_err(|e| annotation_error("Invalid chord mapping").with_cause(e))?;
        let timeline = self.loaded_mut()?;
        if timeline.chord(&mapping.id).is_some() {
            return Err(annotation_error(format!("Chord mapping {} already exists", mapping.id)));
        }
        timeline.chord_mappings.push(mapping.clone());
        timeline.sort_chords();
        timeline.touch();
        Ok(mapping)
    }

    /// Replace the mapping with the same id
    pub fn update_chord(&mut self, mapping: ChordMapping) -> Result<ChordMapping, SyncError> {
        mapping
            .validate()
            .map_err(|e| annotation_error("Invalid chord mapping").with_cause(e))?;
        let timeline = self.loaded_mut()?;
        let slot = timeline
            .chord_mappings
            .iter_mut()
            .find(|m| m.id == mapping.id)
            .ok_or_else(|| annotation_error(format!("Chord mapping {} not found", mapping.id)))?;
        *slot = mapping.clone();
        timeline.sort_chords();
        timeline.touch();
        Ok(mapping)
    }

    pub fn remove_chord(&mut self, id: &str) -> Result<ChordMapping, SyncError> {
        let timeline = self.loaded_mut()?;
        let index = timeline
            .chord_mappings
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| annotation_error(format!("Chord mapping {} not found", id)))?;
        let removed = timeline.chord_mappings.remove(index);
        timeline.touch();
        Ok(removed)
    }

    pub fn add_marker(&mut self, marker: Marker) -> Result<Marker, SyncError> {
        marker
            .validate()
            .map_err(|e| annotation_error("Invalid marker").with_cause(e))?;
        let timeline = self.loaded_mut()?;
        if timeline.marker(&marker.id).is_some() {
            return Err(annotation_error(format!("Marker {} already exists", marker.id)));
        }
        timeline.markers.push(marker.clone());
        timeline.sort_markers();
        timeline.touch();
        Ok(marker)
    }

    pub fn update_marker(&mut self, marker: Marker) -> Result<Marker, SyncError> {
        marker
            .validate()
            .map_err(|e| annotation_error("Invalid marker").with_cause(e))?;
        let timeline = self.loaded_mut()?;
        let slot = timeline
            .markers
            .iter_mut()
            .find(|m| m.id == marker.id)
            .ok_or_else(|| annotation_error(format!("Marker {} not found", marker.id)))?;
        *slot = marker.clone();
        timeline.sort_markers();
        timeline.touch();
        Ok(marker)
    }

    pub fn remove_marker(&mut self, id: &str) -> Result<Marker, SyncError> {
        let timeline = self.loaded_mut()?;
        let index = timeline
            .markers
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| annotation_error(format!("Marker {} not found", id)))?;
        let removed = timeline.markers.remove(index);
        timeline.touch();
        Ok(removed)
    }

    /// Mutable access for bulk edits that re-sort afterwards
    pub(crate) fn edit<F>(&mut self, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut Timeline),
    {
        let timeline = self.loaded_mut()?;
        f(timeline);
        timeline.sort_chords();
        timeline.sort_markers();
        timeline.touch();
        Ok(())
    }
}
