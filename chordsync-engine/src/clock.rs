//! Audio clocks
//!
//! The graph backend and the metronome both schedule against an audio
//! clock: a monotonic time in seconds, independent of timer jitter.

use std::sync::Mutex;
use std::time::Instant;

/// Monotonic audio-clock time in seconds
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock backed by `Instant`, starting at 0.0 on construction
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualClock {
    time: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: Mutex::new(start),
        }
    }

    pub fn set(&self, seconds: f64) {
        *self.time.lock().unwrap_or_else(|e| e.into_inner()) = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.time.lock().unwrap_or_else(|e| e.into_inner()) += seconds;
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        *self.time.lock().unwrap_or_else(|e| e.into_inner())
    }
}
