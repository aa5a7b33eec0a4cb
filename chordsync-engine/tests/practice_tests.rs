//! Practice scenarios: metronome timing, streaks, achievements and the
//! on-disk store

use std::sync::Arc;

use chordsync_common::events::drain;
use chordsync_engine::clock::ManualClock;
use chordsync_engine::config::PracticeConfig;
use chordsync_engine::practice::{
    BufferSink, JsonFileStore, Metronome, MetronomeEvent, MetronomeSettings, PracticeCoordinator, PracticeState,
    SessionOptions, TimingClass,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, 18, 0, 0).unwrap()
}

fn practice(coordinator: &mut PracticeCoordinator, at: DateTime<Utc>, minutes: i64) {
    coordinator.start_session(SessionOptions::default(), at).unwrap();
    coordinator.end_session(at + Duration::minutes(minutes)).unwrap();
}

#[test]
fn test_metronome_at_120_bpm() {
    let clock = Arc::new(ManualClock::new(0.0));
    let sink = BufferSink::new(8000);
    let mut metronome = Metronome::new(MetronomeSettings::default(), clock.clone(), Box::new(sink.clone()));
    let mut rx = metronome.subscribe();

    metronome.start();
    for _ in 0..20 {
        clock.advance(0.1);
        metronome.schedule_ahead();
    }

    let beats: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            MetronomeEvent::Beat {
                index,
                measure,
                accent,
                time,
                ..
            } => Some((index, measure, accent, time)),
            _ => None,
        })
        .collect();

    // horizon is 2.0 + 0.1 lookahead
    assert_eq!(beats.len(), 5);
    for (i, (index, _, _, time)) in beats.iter().enumerate() {
        assert_eq!(*index, i as u64);
        assert!((time - i as f64 * 0.5).abs() < 1e-9);
    }
    let accented: Vec<u64> = beats.iter().filter(|b| b.2).map(|b| b.0).collect();
    assert_eq!(accented, vec![0, 4]);
    assert_eq!(beats[4].1, 2);

    assert_eq!(sink.scheduled_times().len(), 5);
}

#[test]
fn test_streak_across_days() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();

    practice(&mut coordinator, day(1), 10);
    practice(&mut coordinator, day(2), 10);
    practice(&mut coordinator, day(3), 10);
    assert_eq!(coordinator.progress().current_streak, 3);

    // same day again does not extend the streak
    practice(&mut coordinator, day(3) + Duration::hours(2), 5);
    assert_eq!(coordinator.progress().current_streak, 3);

    // three days later the streak restarts
    practice(&mut coordinator, day(6), 10);
    assert_eq!(coordinator.progress().current_streak, 1);
    assert_eq!(coordinator.progress().longest_streak, 3);
}

#[test]
fn test_progress_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let mut coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();
        practice(&mut coordinator, day(1), 30);
        practice(&mut coordinator, day(2), 40);
    }

    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();

    assert_eq!(coordinator.sessions().len(), 2);
    assert_eq!(coordinator.progress().statistics.sessions_completed, 2);
    assert_eq!(coordinator.progress().statistics.total_practice_secs, 70.0 * 60.0);
    assert_eq!(coordinator.progress().current_streak, 2);
    assert_eq!(coordinator.progress().last_practice_date, Some(day(2).date_naive()));

    let hour = coordinator
        .achievements()
        .iter()
        .find(|a| a.id == "hour-of-practice")
        .unwrap();
    assert!(hour.is_unlocked());
}

#[test]
fn test_achievements_unlock_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();

    practice(&mut coordinator, day(1), 10);
    let first = coordinator.sessions()[0].clone();
    assert_eq!(first.achievements_unlocked, vec!["first-session".to_string()]);

    assert!(coordinator.check_achievements().unwrap().is_empty());
    assert!(coordinator.check_achievements().unwrap().is_empty());

    let unlocked_at = coordinator
        .achievements()
        .iter()
        .find(|a| a.id == "first-session")
        .and_then(|a| a.unlocked_at);
    practice(&mut coordinator, day(2), 10);
    let still = coordinator
        .achievements()
        .iter()
        .find(|a| a.id == "first-session")
        .and_then(|a| a.unlocked_at);
    assert_eq!(unlocked_at, still);
}

#[test]
fn test_timing_tolerance_boundary() {
    let store = Arc::new(chordsync_engine::practice::MemoryStore::new());
    let mut coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();
    coordinator.start_session(SessionOptions::default(), day(1)).unwrap();

    let exact = coordinator.record_timing("C", 10.0, 10.0);
    assert_eq!(exact.timing, TimingClass::Perfect);
    assert_eq!(exact.accuracy, 1.0);

    // perfect window is a third of the 100 ms tolerance
    assert_eq!(coordinator.record_timing("Am", 10.0, 10.03).timing, TimingClass::Perfect);
    assert_eq!(coordinator.record_timing("Am", 10.0, 10.04).timing, TimingClass::Late);

    let early = coordinator.record_timing("F", 10.0, 9.8);
    assert_eq!(early.timing, TimingClass::Early);
    assert_eq!(early.accuracy, 0.0);

    let stats = &coordinator.active_session().unwrap().statistics;
    assert_eq!(stats.timing_samples, 4);
    assert_eq!(stats.perfect_timings, 2);
    assert_eq!(coordinator.timing_history().len(), 4);
}

#[test]
fn test_paused_time_is_not_counted() {
    let store = Arc::new(chordsync_engine::practice::MemoryStore::new());
    let mut coordinator = PracticeCoordinator::new(&PracticeConfig::default(), store).unwrap();

    let start = day(1);
    coordinator.start_session(SessionOptions::default(), start).unwrap();
    coordinator.pause_session(start + Duration::minutes(5)).unwrap();
    assert_eq!(coordinator.state(), PracticeState::Paused);
    coordinator.resume_session(start + Duration::minutes(15)).unwrap();
    let session = coordinator.end_session(start + Duration::minutes(20)).unwrap();

    assert_eq!(session.duration, 600.0);
    assert_eq!(coordinator.state(), PracticeState::Ended);
}
