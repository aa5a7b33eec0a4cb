//! Easing curves for scroll animation and tone envelopes
//!
//! Each curve maps normalized progress `t` in `[0.0, 1.0]` to an eased
//! progress value in the same range. `0.0` maps to `0.0` and `1.0` to
//! `1.0` for every curve.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Easing curve types
///
/// - Linear: constant rate, used by progressive stepping
/// - EaseIn: slow start, fast finish
/// - EaseOut: fast start, slow finish
/// - EaseInOut: cubic acceleration then deceleration (default for smooth scroll)
/// - Sine: gentle S-curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EasingCurve {
    /// v(t) = t
    Linear,

    /// v(t) = t²
    EaseIn,

    /// v(t) = 1 - (1-t)²
    EaseOut,

    /// Cubic ease-in-out:
    /// v(t) = 4t³ for t < 0.5, else 1 - (-2t + 2)³ / 2
    #[default]
    EaseInOut,

    /// v(t) = 0.5 × (1 - cos(π × t))
    Sine,
}

impl EasingCurve {
    /// Eased progress at normalized position `t` (clamped to `[0, 1]`)
    pub fn apply(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);

        match self {
            EasingCurve::Linear => t,
            EasingCurve::EaseIn => t * t,
            EasingCurve::EaseOut => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            EasingCurve::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            EasingCurve::Sine => 0.5 * (1.0 - (PI * t).cos()),
        }
    }

    /// Interpolate between `from` and `to` at normalized position `t`
    pub fn interpolate(&self, from: f64, to: f64, t: f64) -> f64 {
        from + (to - from) * self.apply(t)
    }
}

/// Exponential decay gain from `start` towards `floor` over `duration` seconds
///
/// Matches an exponential ramp: `start × (floor/start)^(elapsed/duration)`.
/// Returns `floor` once `elapsed >= duration`.
pub fn exponential_decay(start: f64, floor: f64, elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 || elapsed >= duration {
        return floor;
    }
    if elapsed <= 0.0 {
        return start;
    }
    start * (floor / start).powf(elapsed / duration)
}
