//! Auto-scroll configuration, inputs and events

use chordsync_common::events::NamedEvent;
use chordsync_common::timeline::{MarkerType, TempoMapping, TimeSignature, Timeline};
use chordsync_common::EasingCurve;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the surface moves to a new target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    /// Jump immediately
    Instant,
    /// Eased interpolation over a distance-dependent duration
    #[default]
    Smooth,
    /// Fixed-size steps per animation frame, scaled by tempo
    Progressive,
}

/// Auto-scroll settings (process-wide, not persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoScrollConfig {
    pub enabled: bool,
    pub behavior: ScrollBehavior,
    /// Divides smooth-scroll duration (> 0)
    pub speed: f64,
    /// 0.0–1.0, stretches smooth-scroll duration
    pub smoothness: f64,
    /// Fraction of the viewport height the target is centered at
    pub center_threshold: f64,
    /// Scroll ahead of the beat using tempo context
    pub smart_scrolling: bool,
    /// Seconds of anticipation
    pub anticipation_time: f64,
    /// Pixels one beat occupies on the surface
    pub pixels_per_beat: f64,
    /// Anticipation used when no tempo is known
    pub anticipation_offset_px: f64,
    /// Suspend auto-scroll after user scrolling
    pub manual_override: bool,
    pub manual_override_timeout_ms: u64,
    /// Progressive step at 120 BPM
    pub progressive_step_px: f64,
    pub easing: EasingCurve,
    pub event_capacity: usize,
}

impl Default for AutoScrollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            behavior: ScrollBehavior::Smooth,
            speed: 1.0,
            smoothness: 0.5,
            center_threshold: 0.4,
            smart_scrolling: false,
            anticipation_time: 0.5,
            pixels_per_beat: 24.0,
            anticipation_offset_px: 40.0,
            manual_override: true,
            manual_override_timeout_ms: 3000,
            progressive_step_px: 8.0,
            easing: EasingCurve::EaseInOut,
            event_capacity: 256,
        }
    }
}

/// Scrollable display surface driven by the controller
pub trait ScrollSurface: Send {
    fn scroll_top(&self) -> f64;

    fn set_scroll_top(&mut self, top: f64);

    fn viewport_height(&self) -> f64;

    /// Total content height
    fn scroll_height(&self) -> f64;

    fn max_scroll_top(&self) -> f64 {
        (self.scroll_height() - self.viewport_height()).max(0.0)
    }
}

/// Surface without a display; the CLI and tests drive this one
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualSurface {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub scroll_height: f64,
}

impl VirtualSurface {
    pub fn new(viewport_height: f64, scroll_height: f64) -> Self {
        Self {
            scroll_top: 0.0,
            viewport_height,
            scroll_height,
        }
    }
}

impl ScrollSurface for VirtualSurface {
    fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    fn set_scroll_top(&mut self, top: f64) {
        self.scroll_top = top.clamp(0.0, self.max_scroll_top());
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn scroll_height(&self) -> f64 {
        self.scroll_height
    }
}

/// Position of an element in surface content coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub top: f64,
    pub height: f64,
}

impl ElementRect {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    pub fn center(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// Chord-change input to the controller
#[derive(Debug, Clone, PartialEq)]
pub struct ChordScrollRequest {
    pub chord_id: String,
    pub target: ElementRect,
    /// Playback time of the change (seconds)
    pub current_time: f64,
}

/// A song section between two markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionBoundary {
    pub start_time: f64,
    /// `None` runs to the end of the song
    pub end_time: Option<f64>,
    pub section_type: MarkerType,
    pub label: String,
}

/// Musical context for smart scrolling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartScrollContext {
    /// Beats per minute when no tempo change applies
    pub tempo: Option<f64>,
    #[serde(default)]
    pub tempo_changes: Vec<TempoMapping>,
    pub time_signature: Option<TimeSignature>,
    pub sections: Vec<SectionBoundary>,
}

impl SmartScrollContext {
    /// Tempo from metadata and tempo mappings, sections from consecutive
    /// markers
    pub fn from_timeline(timeline: &Timeline) -> Self {
        let sections = timeline
            .markers
            .iter()
            .enumerate()
            .map(|(i, marker)| SectionBoundary {
                start_time: marker.time,
                end_time: timeline.markers.get(i + 1).map(|next| next.time),
                section_type: marker.marker_type,
                label: marker.label.clone(),
            })
            .collect();

        Self {
            tempo: timeline.metadata.tempo,
            tempo_changes: timeline.tempo_mappings.clone(),
            time_signature: timeline.metadata.time_signature,
            sections,
        }
    }

    /// Tempo in effect at `time`; the latest change wins over the base tempo
    pub fn tempo_at(&self, time: f64) -> Option<f64> {
        self.tempo_changes
            .iter()
            .filter(|t| t.start_time <= time && t.end_time.map_or(true, |end| time < end))
            .max_by(|a, b| a.start_time.total_cmp(&b.start_time))
            .map(|t| t.bpm)
            .or(self.tempo)
    }

    /// Section containing `time`
    pub fn section_at(&self, time: f64) -> Option<MarkerType> {
        self.sections
            .iter()
            .rev()
            .find(|s| s.start_time <= time && s.end_time.map_or(true, |end| time < end))
            .map(|s| s.section_type)
    }
}

/// Last scroll target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPosition {
    pub offset: f64,
    pub timestamp: DateTime<Utc>,
    pub chord_id: Option<String>,
    pub section_type: Option<MarkerType>,
}

/// Source of a user scroll gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserScrollKind {
    Wheel,
    Touch,
    Scroll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyModifiers {
    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Disabled,
    EmergencyStopped,
    ManualOverride,
    AlreadyInPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScrollEvent {
    ScrollStarted {
        chord_id: String,
        from: f64,
        to: f64,
        behavior: ScrollBehavior,
    },
    ScrollCompleted { chord_id: String, offset: f64 },
    ScrollSkipped { chord_id: String, reason: SkipReason },
    ManualOverrideStarted,
    ManualOverrideEnded,
    EmergencyStopped,
    EmergencyCleared,
}

impl NamedEvent for ScrollEvent {
    fn event_name(&self) -> &'static str {
        match self {
            ScrollEvent::ScrollStarted { .. } => "scroll:started",
            ScrollEvent::ScrollCompleted { .. } => "scroll:completed",
            ScrollEvent::ScrollSkipped { .. } => "scroll:skipped",
            ScrollEvent::ManualOverrideStarted => "scroll:manualoverridestarted",
            ScrollEvent::ManualOverrideEnded => "scroll:manualoverrideended",
            ScrollEvent::EmergencyStopped => "scroll:emergencystopped",
            ScrollEvent::EmergencyCleared => "scroll:emergencycleared",
        }
    }
}
