//! Achievement catalog and evaluation
//!
//! An achievement unlocks at most once: evaluation only ever fills an empty
//! `unlocked_at`, and reports just the ones it filled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::UserProgress;

/// Unlock condition against cumulative progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "camelCase")]
pub enum AchievementCriteria {
    SessionsCompleted(u32),
    PracticeMinutes(u64),
    Streak(u32),
    ChordChanges(u64),
    PerfectTimings(u64),
    LoopsCompleted(u64),
}

impl AchievementCriteria {
    pub fn is_met(&self, progress: &UserProgress) -> bool {
        let stats = &progress.statistics;
        match *self {
            AchievementCriteria::SessionsCompleted(n) => stats.sessions_completed >= n,
            AchievementCriteria::PracticeMinutes(n) => stats.practice_minutes() >= n as f64,
            AchievementCriteria::Streak(n) => progress.current_streak >= n,
            AchievementCriteria::ChordChanges(n) => stats.chord_changes >= n,
            AchievementCriteria::PerfectTimings(n) => stats.perfect_timings >= n,
            AchievementCriteria::LoopsCompleted(n) => stats.loops_completed >= n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub criteria: AchievementCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl Achievement {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        criteria: AchievementCriteria,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            criteria,
            unlocked_at: None,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }
}

/// Built-in achievements, all locked
pub fn default_achievements() -> Vec<Achievement> {
    use AchievementCriteria::*;
    vec![
        Achievement::new("first-session", "First Steps", "Complete your first practice session", SessionsCompleted(1)),
        Achievement::new("ten-sessions", "Regular", "Complete 10 practice sessions", SessionsCompleted(10)),
        Achievement::new("hour-of-practice", "Dedicated", "Practice for a total of 60 minutes", PracticeMinutes(60)),
        Achievement::new("streak-3", "On a Roll", "Practice 3 days in a row", Streak(3)),
        Achievement::new("streak-7", "Week Warrior", "Practice 7 days in a row", Streak(7)),
        Achievement::new("chord-changer", "Chord Changer", "Play through 100 chord changes", ChordChanges(100)),
        Achievement::new("perfect-10", "Right on Time", "Land 10 perfectly timed changes", PerfectTimings(10)),
        Achievement::new("loop-master", "Loop Master", "Complete 25 loop repetitions", LoopsCompleted(25)),
    ]
}

/// Catalog entries missing from `stored` are appended locked; stored unlock
/// times are kept
pub fn merge_catalog(stored: Vec<Achievement>) -> Vec<Achievement> {
    let mut merged = stored;
    for achievement in default_achievements() {
        if !merged.iter().any(|a| a.id == achievement.id) {
            merged.push(achievement);
        }
    }
    merged
}

/// Unlock every locked achievement whose criteria are met; returns the newly
/// unlocked ones
pub fn evaluate(achievements: &mut [Achievement], progress: &UserProgress, now: DateTime<Utc>) -> Vec<Achievement> {
    achievements
        .iter_mut()
        .filter(|a| !a.is_unlocked() && a.criteria.is_met(progress))
        .map(|a| {
            a.unlocked_at = Some(now);
            a.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut achievements = default_achievements();
        let mut progress = UserProgress::default();
        progress.statistics.sessions_completed = 1;
        progress.current_streak = 3;

        let first = evaluate(&mut achievements, &progress, Utc::now());
        let ids: Vec<_> = first.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["first-session", "streak-3"]);

        assert!(evaluate(&mut achievements, &progress, Utc::now()).is_empty());
    }

    #[test]
    fn test_unlock_time_never_changes() {
        let mut achievements = default_achievements();
        let mut progress = UserProgress::default();
        progress.statistics.sessions_completed = 1;

        let t0 = Utc::now();
        evaluate(&mut achievements, &progress, t0);
        progress.statistics.sessions_completed = 10;
        let later = evaluate(&mut achievements, &progress, t0 + chrono::Duration::days(1));

        assert_eq!(later.len(), 1);
        assert_eq!(later[0].id, "ten-sessions");
        assert_eq!(achievements[0].unlocked_at, Some(t0));
    }

    #[test]
    fn test_merge_catalog_keeps_stored_state() {
        let mut stored = vec![default_achievements().remove(0)];
        stored[0].unlocked_at = Some(Utc::now());

        let merged = merge_catalog(stored);
        assert_eq!(merged.len(), default_achievements().len());
        assert!(merged[0].is_unlocked());
        assert!(merged[1..].iter().all(|a| !a.is_unlocked()));
    }

    #[test]
    fn test_criteria_serialization() {
        let json = serde_json::to_value(AchievementCriteria::Streak(7)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "streak", "target": 7}));
    }
}
