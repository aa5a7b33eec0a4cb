//! Practice tools
//!
//! - [`Metronome`]: look-ahead beat scheduler against the audio clock
//! - [`PracticeCoordinator`]: session state machine, goals, timing feedback,
//!   achievements and streaks, persisted through a [`ProgressStore`]

pub mod achievements;
pub mod metronome;
pub mod progress;
pub mod session;
pub mod store;
pub mod timing;

pub use achievements::{default_achievements, Achievement, AchievementCriteria};
pub use metronome::{
    spawn_metronome, BufferSink, Metronome, MetronomeEvent, MetronomeSettings, MetronomeSound, NullToneSink,
    Subdivision, ToneSink, ToneSpec, Waveform,
};
pub use progress::{PracticeStatistics, UserProgress};
pub use session::{
    Difficulty, GoalKind, PracticeCoordinator, PracticeEvent, PracticeGoal, PracticeSession, PracticeState,
    Recording, SessionOptions,
};
pub use store::{JsonFileStore, MemoryStore, ProgressStore, StoreKey};
pub use timing::{classify, TimingClass, TimingFeedback};
