//! Auto-scroll
//!
//! Moves a [`ScrollSurface`] so the active chord stays in view, with manual
//! override detection and a sticky emergency stop.

pub mod controller;
pub mod types;

pub use controller::{
    progressive_step, smooth_duration, spawn_scroll_frames, AutoScrollController, FRAME_INTERVAL,
};
pub use types::{
    AutoScrollConfig, ChordScrollRequest, ElementRect, KeyModifiers, ScrollBehavior, ScrollEvent,
    ScrollPosition, ScrollSurface, SectionBoundary, SkipReason, SmartScrollContext, UserScrollKind,
    VirtualSurface,
};
