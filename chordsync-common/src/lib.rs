//! # chordsync common library
//!
//! Shared code for the chordsync workspace:
//! - Timeline data model (chord mappings, markers, loop sections)
//! - Generic typed event bus
//! - Configuration file resolution
//! - Easing curves for scroll animation
//! - Time utilities

pub mod config;
pub mod easing;
pub mod error;
pub mod events;
pub mod time;
pub mod timeline;

pub use easing::EasingCurve;
pub use error::{Error, Result};
pub use events::EventBus;
