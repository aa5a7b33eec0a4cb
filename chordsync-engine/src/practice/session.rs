//! Practice session coordination
//!
//! State machine: `None -> Active -> (Paused <-> Active) -> Ended`. Only one
//! session exists at a time; starting a new one seals the current one
//! first. Sealing computes the duration without paused time, folds the
//! session counters into [`UserProgress`], advances the streak, evaluates
//! achievements and persists everything through the [`ProgressStore`].
//!
//! Time-dependent operations take `now` explicitly.

use chordsync_common::events::{EventBus, NamedEvent};
use chordsync_common::timeline::LoopSection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::achievements::{evaluate, merge_catalog, Achievement};
use super::metronome::MetronomeSettings;
use super::progress::{PracticeStatistics, UserProgress};
use super::store::{load_blob, save_blob, ProgressStore, StoreKey};
use super::timing::{TimingClass, TimingFeedback};
use crate::config::PracticeConfig;
use crate::error::{Error, Result};
use crate::sync::SyncEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PracticeState {
    None,
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GoalKind {
    PracticeMinutes,
    ChordChanges,
    LoopRepetitions,
    PerfectTimings,
    /// Average accuracy in percent
    TimingAccuracy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeGoal {
    pub id: String,
    pub kind: GoalKind,
    pub target: f64,
    pub current: f64,
    pub completed: bool,
}

impl PracticeGoal {
    pub fn new(kind: GoalKind, target: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target,
            current: 0.0,
            completed: false,
        }
    }

    /// Refresh `current`; returns true when this call completed the goal
    fn update(&mut self, stats: &PracticeStatistics) -> bool {
        self.current = match self.kind {
            GoalKind::PracticeMinutes => stats.practice_minutes(),
            GoalKind::ChordChanges => stats.chord_changes as f64,
            GoalKind::LoopRepetitions => stats.loops_completed as f64,
            GoalKind::PerfectTimings => stats.perfect_timings as f64,
            GoalKind::TimingAccuracy => stats.average_accuracy * 100.0,
        };
        if !self.completed && self.current >= self.target {
            self.completed = true;
            return true;
        }
        false
    }
}

/// Parameters of a new session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub song_id: Option<String>,
    pub goals: Vec<PracticeGoal>,
    pub difficulty: Difficulty,
    pub recording_enabled: bool,
    pub metronome: Option<MetronomeSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds, paused time excluded
    pub duration: f64,
    pub goals: Vec<PracticeGoal>,
    pub statistics: PracticeStatistics,
    /// Ids of achievements unlocked when the session ended
    pub achievements_unlocked: Vec<String>,
    pub loop_sections: Vec<LoopSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metronome: Option<MetronomeSettings>,
    pub difficulty: Difficulty,
    pub recording_enabled: bool,
}

/// Practice take; audio capture itself belongs to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PracticeEvent {
    SessionStarted { session_id: String, song_id: Option<String> },
    SessionPaused { session_id: String },
    SessionResumed { session_id: String },
    SessionEnded { session: PracticeSession },
    AchievementUnlocked { achievement: Achievement },
    TimingFeedback { feedback: TimingFeedback },
    ProgressUpdated { progress: UserProgress },
    GoalCompleted { session_id: String, goal: PracticeGoal },
    RecordingStarted { recording_id: String },
    RecordingStopped { recording: Recording },
}

impl NamedEvent for PracticeEvent {
    fn event_name(&self) -> &'static str {
        match self {
            PracticeEvent::SessionStarted { .. } => "practice:session_started",
            PracticeEvent::SessionPaused { .. } => "practice:session_paused",
            PracticeEvent::SessionResumed { .. } => "practice:session_resumed",
            PracticeEvent::SessionEnded { .. } => "practice:session_ended",
            PracticeEvent::AchievementUnlocked { .. } => "practice:achievement_unlocked",
            PracticeEvent::TimingFeedback { .. } => "practice:timing_feedback",
            PracticeEvent::ProgressUpdated { .. } => "practice:progress_updated",
            PracticeEvent::GoalCompleted { .. } => "practice:goal_completed",
            PracticeEvent::RecordingStarted { .. } => "practice:recording_started",
            PracticeEvent::RecordingStopped { .. } => "practice:recording_stopped",
        }
    }
}

/// Seconds between two instants, never negative
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

struct ActiveSession {
    session: PracticeSession,
    paused_at: Option<DateTime<Utc>>,
    paused_secs: f64,
    recording: Option<Recording>,
}

pub struct PracticeCoordinator {
    timing_tolerance_ms: f64,
    store: Arc<dyn ProgressStore>,
    events: EventBus<PracticeEvent>,
    state: PracticeState,
    active: Option<ActiveSession>,
    progress: UserProgress,
    achievements: Vec<Achievement>,
    sessions: Vec<PracticeSession>,
    recordings: Vec<Recording>,
    timing_history: Vec<TimingFeedback>,
    destroyed: bool,
}

impl PracticeCoordinator {
    /// Load persisted progress, achievements, sessions and recordings
    ///
    /// # Errors
    /// Store read failures and malformed blobs.
    pub fn new(config: &PracticeConfig, store: Arc<dyn ProgressStore>) -> Result<Self> {
        let progress = load_blob(store.as_ref(), StoreKey::Progress)?.unwrap_or_default();
        let achievements = merge_catalog(load_blob(store.as_ref(), StoreKey::Achievements)?.unwrap_or_default());
        let sessions: Vec<PracticeSession> = load_blob(store.as_ref(), StoreKey::Sessions)?.unwrap_or_default();
        let recordings = load_blob(store.as_ref(), StoreKey::Recordings)?.unwrap_or_default();
        debug!("Loaded practice history: {} sessions", sessions.len());

        Ok(Self {
            timing_tolerance_ms: config.timing_tolerance_ms,
            store,
            events: EventBus::new(config.event_capacity),
            state: PracticeState::None,
            active: None,
            progress,
            achievements,
            sessions,
            recordings,
            timing_history: Vec::new(),
            destroyed: false,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PracticeEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PracticeState {
        self.state
    }

    pub fn active_session(&self) -> Option<&PracticeSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn progress(&self) -> &UserProgress {
        &self.progress
    }

    pub fn achievements(&self) -> &[Achievement] {
        &self.achievements
    }

    pub fn sessions(&self) -> &[PracticeSession] {
        &self.sessions
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn timing_history(&self) -> &[TimingFeedback] {
        &self.timing_history
    }

    pub fn is_recording(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.recording.is_some())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(Error::InvalidState("practice coordinator destroyed".to_string()));
        }
        Ok(())
    }

    /// Start a session, sealing any active one first
    pub fn start_session(&mut self, options: SessionOptions, now: DateTime<Utc>) -> Result<PracticeSession> {
        self.ensure_alive()?;
        if self.active.is_some() {
            info!("Ending previous session before starting a new one");
            self.end_session(now)?;
        }

        let session = PracticeSession {
            id: Uuid::new_v4().to_string(),
            song_id: options.song_id,
            started_at: now,
            ended_at: None,
            duration: 0.0,
            goals: options.goals,
            statistics: PracticeStatistics::default(),
            achievements_unlocked: Vec::new(),
            loop_sections: Vec::new(),
            metronome: options.metronome,
            difficulty: options.difficulty,
            recording_enabled: options.recording_enabled,
        };
        info!("Practice session {} started", session.id);

        self.active = Some(ActiveSession {
            session: session.clone(),
            paused_at: None,
            paused_secs: 0.0,
            recording: None,
        });
        self.state = PracticeState::Active;
        self.events.emit_lossy(PracticeEvent::SessionStarted {
            session_id: session.id.clone(),
            song_id: session.song_id.clone(),
        });

        if session.recording_enabled {
            self.start_recording(now)?;
        }
        Ok(session)
    }

    pub fn pause_session(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != PracticeState::Active {
            return Err(Error::InvalidState(format!("cannot pause from {:?}", self.state)));
        }
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;
        active.paused_at = Some(now);
        self.state = PracticeState::Paused;
        self.events.emit_lossy(PracticeEvent::SessionPaused {
            session_id: active.session.id.clone(),
        });
        Ok(())
    }

    pub fn resume_session(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != PracticeState::Paused {
            return Err(Error::InvalidState(format!("cannot resume from {:?}", self.state)));
        }
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;
        if let Some(paused_at) = active.paused_at.take() {
            active.paused_secs += seconds_between(paused_at, now);
        }
        self.state = PracticeState::Active;
        self.events.emit_lossy(PracticeEvent::SessionResumed {
            session_id: active.session.id.clone(),
        });
        Ok(())
    }

    /// Seal the active session
    ///
    /// Stops an active recording, merges statistics, advances the streak,
    /// evaluates achievements and persists. Returns the sealed session.
    pub fn end_session(&mut self, now: DateTime<Utc>) -> Result<PracticeSession> {
        if self.active.as_ref().is_some_and(|a| a.recording.is_some()) {
            self.stop_recording(now)?;
        }
        let mut active = self
            .active
            .take()
            .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;

        if let Some(paused_at) = active.paused_at.take() {
            active.paused_secs += seconds_between(paused_at, now);
        }
        let session = &mut active.session;
        session.ended_at = Some(now);
        session.duration = (seconds_between(session.started_at, now) - active.paused_secs).max(0.0);
        session.statistics.total_practice_secs = session.duration;
        session.statistics.sessions_completed = 1;
        let completed = Self::update_goals(session);
        for goal in completed {
            self.events.emit_lossy(PracticeEvent::GoalCompleted {
                session_id: session.id.clone(),
                goal,
            });
        }

        self.progress.statistics.merge(&session.statistics);
        self.progress.update_streak(now.date_naive());

        let unlocked = self.unlock_achievements(now);
        session.achievements_unlocked = unlocked.iter().map(|a| a.id.clone()).collect();

        let session = active.session;
        self.sessions.push(session.clone());
        self.state = PracticeState::Ended;
        info!(
            "Practice session {} ended after {:.0}s (streak {})",
            session.id, session.duration, self.progress.current_streak
        );

        self.persist()?;
        self.events.emit_lossy(PracticeEvent::SessionEnded {
            session: session.clone(),
        });
        self.events.emit_lossy(PracticeEvent::ProgressUpdated {
            progress: self.progress.clone(),
        });
        Ok(session)
    }

    pub fn add_goal(&mut self, kind: GoalKind, target: f64) -> Result<PracticeGoal> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;
        let mut goal = PracticeGoal::new(kind, target);
        goal.update(&active.session.statistics);
        active.session.goals.push(goal.clone());
        Ok(goal)
    }

    fn update_goals(session: &mut PracticeSession) -> Vec<PracticeGoal> {
        let stats = session.statistics.clone();
        session
            .goals
            .iter_mut()
            .filter_map(|goal| goal.update(&stats).then(|| goal.clone()))
            .collect()
    }

    fn refresh_active_goals(&mut self) {
        if let Some(active) = self.active.as_mut() {
            for goal in Self::update_goals(&mut active.session) {
                debug!("Goal {:?} completed", goal.kind);
                self.events.emit_lossy(PracticeEvent::GoalCompleted {
                    session_id: active.session.id.clone(),
                    goal,
                });
            }
        }
    }

    /// Counting only happens while a session is active and not paused
    fn counting_session(&mut self) -> Option<&mut PracticeSession> {
        if self.state != PracticeState::Active {
            return None;
        }
        self.active.as_mut().map(|a| &mut a.session)
    }

    /// Classify a played chord change and record it
    pub fn record_timing(&mut self, chord_name: &str, expected: f64, actual: f64) -> TimingFeedback {
        let feedback = TimingFeedback::evaluate(chord_name, expected, actual, self.timing_tolerance_ms);
        debug!(
            "Timing {} {:?} ({:+.0} ms, accuracy {:.2})",
            chord_name, feedback.timing, feedback.offset_ms, feedback.accuracy
        );
        self.timing_history.push(feedback.clone());

        let perfect = feedback.timing == TimingClass::Perfect;
        if let Some(session) = self.counting_session() {
            session.statistics.record_accuracy(feedback.accuracy, perfect);
        }
        self.refresh_active_goals();

        self.events.emit_lossy(PracticeEvent::TimingFeedback {
            feedback: feedback.clone(),
        });
        feedback
    }

    /// Count chord changes and completed loop passes
    pub fn handle_sync_event(&mut self, event: &SyncEvent) {
        let Some(session) = self.counting_session() else {
            return;
        };
        match event {
            SyncEvent::ChordChange { chord: Some(_), .. } => {
                session.statistics.chord_changes += 1;
            }
            SyncEvent::LoopEnd { section } => {
                session.statistics.loops_completed += 1;
                if !session.loop_sections.iter().any(|s| s.id == section.id) {
                    session.loop_sections.push(section.clone());
                }
            }
            _ => return,
        }
        self.refresh_active_goals();
    }

    fn unlock_achievements(&mut self, now: DateTime<Utc>) -> Vec<Achievement> {
        let unlocked = evaluate(&mut self.achievements, &self.progress, now);
        for achievement in &unlocked {
            info!("Achievement unlocked: {}", achievement.title);
            self.events.emit_lossy(PracticeEvent::AchievementUnlocked {
                achievement: achievement.clone(),
            });
        }
        unlocked
    }

    /// Evaluate achievements against current progress
    ///
    /// Returns only newly unlocked achievements; a second call with unchanged
    /// progress returns nothing.
    pub fn check_achievements(&mut self) -> Result<Vec<Achievement>> {
        let unlocked = self.unlock_achievements(Utc::now());
        if !unlocked.is_empty() {
            save_blob(self.store.as_ref(), StoreKey::Achievements, &self.achievements)?;
        }
        Ok(unlocked)
    }

    pub fn start_recording(&mut self, now: DateTime<Utc>) -> Result<Recording> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("recording requires an active session".to_string()))?;
        if let Some(existing) = &active.recording {
            return Ok(existing.clone());
        }
        let recording = Recording {
            id: Uuid::new_v4().to_string(),
            session_id: active.session.id.clone(),
            started_at: now,
            ended_at: None,
            duration: 0.0,
        };
        active.recording = Some(recording.clone());
        self.events.emit_lossy(PracticeEvent::RecordingStarted {
            recording_id: recording.id.clone(),
        });
        Ok(recording)
    }

    /// Returns `None` when nothing was recording
    pub fn stop_recording(&mut self, now: DateTime<Utc>) -> Result<Option<Recording>> {
        let Some(mut recording) = self.active.as_mut().and_then(|a| a.recording.take()) else {
            return Ok(None);
        };
        recording.ended_at = Some(now);
        recording.duration = seconds_between(recording.started_at, now);
        self.recordings.push(recording.clone());
        save_blob(self.store.as_ref(), StoreKey::Recordings, &self.recordings)?;
        self.events.emit_lossy(PracticeEvent::RecordingStopped {
            recording: recording.clone(),
        });
        Ok(Some(recording))
    }

    fn persist(&self) -> Result<()> {
        let store = self.store.as_ref();
        save_blob(store, StoreKey::Progress, &self.progress)?;
        save_blob(store, StoreKey::Sessions, &self.sessions)?;
        save_blob(store, StoreKey::Achievements, &self.achievements)?;
        save_blob(store, StoreKey::Recordings, &self.recordings)?;
        Ok(())
    }

    /// End any active session and stop accepting calls. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if self.active.is_some() {
            if let Err(e) = self.end_session(Utc::now()) {
                warn!("Failed to seal session on shutdown: {}", e);
            }
        }
        self.destroyed = true;
    }
}
