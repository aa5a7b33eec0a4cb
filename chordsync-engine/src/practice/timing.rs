//! Timing feedback for chord changes played against the timeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingClass {
    Perfect,
    Early,
    Late,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingFeedback {
    pub chord_name: String,
    pub expected_time: f64,
    pub actual_time: f64,
    /// Negative when early
    pub offset_ms: f64,
    pub timing: TimingClass,
    /// 0.0–1.0
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Classify an onset against its expected time
///
/// Within a third of the tolerance is perfect. Accuracy falls linearly to 0
/// at the tolerance edge and stays there.
pub fn classify(expected: f64, actual: f64, tolerance_ms: f64) -> (TimingClass, f64) {
    let offset_ms = (actual - expected) * 1000.0;
    let tolerance_ms = tolerance_ms.max(f64::EPSILON);

    let class = if offset_ms.abs() <= tolerance_ms / 3.0 {
        TimingClass::Perfect
    } else if offset_ms < 0.0 {
        TimingClass::Early
    } else {
        TimingClass::Late
    };
    let accuracy = (1.0 - offset_ms.abs() / tolerance_ms).max(0.0);
    (class, accuracy)
}

impl TimingFeedback {
    pub fn evaluate(chord_name: impl Into<String>, expected: f64, actual: f64, tolerance_ms: f64) -> Self {
        let (timing, accuracy) = classify(expected, actual, tolerance_ms);
        Self {
            chord_name: chord_name.into(),
            expected_time: expected,
            actual_time: actual,
            offset_ms: (actual - expected) * 1000.0,
            timing,
            accuracy,
            timestamp: Utc::now(),
        }
    }
}
