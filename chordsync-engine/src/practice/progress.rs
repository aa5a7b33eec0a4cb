//! Cumulative practice statistics and streak tracking

use chordsync_common::time::days_between;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Counters for one session or, merged, for a user's whole history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PracticeStatistics {
    pub total_practice_secs: f64,
    pub sessions_completed: u32,
    pub chord_changes: u64,
    pub loops_completed: u64,
    pub timing_samples: u64,
    pub perfect_timings: u64,
    /// Mean timing accuracy over `timing_samples` (0.0–1.0)
    pub average_accuracy: f64,
}

impl PracticeStatistics {
    pub fn practice_minutes(&self) -> f64 {
        self.total_practice_secs / 60.0
    }

    /// Fold one timing accuracy sample into the running mean
    pub fn record_accuracy(&mut self, accuracy: f64, perfect: bool) {
        let n = self.timing_samples as f64;
        self.average_accuracy = (self.average_accuracy * n + accuracy) / (n + 1.0);
        self.timing_samples += 1;
        if perfect {
            self.perfect_timings += 1;
        }
    }

    /// Add another set of counters, weighting the accuracy means by sample count
    pub fn merge(&mut self, other: &PracticeStatistics) {
        let samples = self.timing_samples + other.timing_samples;
        if samples > 0 {
            self.average_accuracy = (self.average_accuracy * self.timing_samples as f64
                + other.average_accuracy * other.timing_samples as f64)
                / samples as f64;
        }
        self.timing_samples = samples;
        self.total_practice_secs += other.total_practice_secs;
        self.sessions_completed += other.sessions_completed;
        self.chord_changes += other.chord_changes;
        self.loops_completed += other.loops_completed;
        self.perfect_timings += other.perfect_timings;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProgress {
    pub statistics: PracticeStatistics,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_practice_date: Option<NaiveDate>,
}

impl UserProgress {
    /// Advance the daily streak for a session ending on `today`
    ///
    /// Yesterday extends the streak, a longer gap restarts it at 1, the same
    /// day (or a clock that moved backwards) leaves it unchanged.
    pub fn update_streak(&mut self, today: NaiveDate) {
        match self.last_practice_date {
            None => self.current_streak = 1,
            Some(last) => match days_between(last, today) {
                1 => self.current_streak += 1,
                gap if gap > 1 => self.current_streak = 1,
                _ => {}
            },
        }
        if self.current_streak == 0 {
            self.current_streak = 1;
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
        if self.last_practice_date.map_or(true, |last| today > last) {
            self.last_practice_date = Some(today);
        }
    }
}
