//! Chord resolution and scroll reconciliation scenarios

use std::time::{Duration, Instant};

use chordsync_common::events::drain;
use chordsync_common::timeline::{ChordMapping, Timeline};
use chordsync_engine::config::SyncConfig;
use chordsync_engine::scroll::{
    AutoScrollConfig, AutoScrollController, ChordScrollRequest, ElementRect, ScrollBehavior, ScrollEvent, SkipReason,
    UserScrollKind, VirtualSurface,
};
use chordsync_engine::sync::{SyncEngine, SyncEvent};

fn c_am() -> Timeline {
    let mut timeline = Timeline::new("song");
    timeline.chord_mappings.push(ChordMapping::manual("C", 0.0, 2.0));
    timeline.chord_mappings.push(ChordMapping::manual("Am", 2.0, 4.0));
    timeline
}

fn chord_changes(events: Vec<SyncEvent>) -> Vec<Option<String>> {
    events
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::ChordChange { chord, .. } => Some(chord.map(|c| c.chord_name)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_chord_sequence_then_idle() {
    let mut sync = SyncEngine::new(SyncConfig::default());
    sync.import_timeline(c_am()).unwrap();
    let mut rx = sync.subscribe();

    for position in [0.0, 1.0, 2.5, 5.0] {
        sync.update_position(position);
    }

    assert_eq!(
        chord_changes(drain(&mut rx)),
        vec![Some("C".to_string()), Some("Am".to_string()), None]
    );
    assert!(!sync.state().is_highlighting);
    assert!(sync.state().current_chord.is_none());
}

#[test]
fn test_export_import_round_trip() {
    let mut sync = SyncEngine::new(SyncConfig::default());
    sync.import_timeline(c_am()).unwrap();
    let exported = sync.export_timeline().unwrap();
    assert_eq!(exported.version, 2);

    let json = exported.to_json_pretty().unwrap();
    let mut other = SyncEngine::new(SyncConfig::default());
    other.import_timeline_json(&json).unwrap();

    let reloaded = other.timeline().unwrap();
    assert_eq!(reloaded.chord_mappings, exported.chord_mappings);
    assert_eq!(reloaded.version, exported.version);
}

#[test]
fn test_rejected_import_keeps_previous_timeline() {
    let mut sync = SyncEngine::new(SyncConfig::default());
    sync.import_timeline(c_am()).unwrap();

    assert!(sync.import_timeline_json("{ not json").is_err());
    assert_eq!(sync.timeline().unwrap().chord_mappings.len(), 2);
}

fn controller() -> AutoScrollController {
    let config = AutoScrollConfig {
        behavior: ScrollBehavior::Instant,
        ..AutoScrollConfig::default()
    };
    AutoScrollController::new(config, Box::new(VirtualSurface::new(500.0, 5000.0)))
}

fn request(chord_id: &str, top: f64) -> ChordScrollRequest {
    ChordScrollRequest {
        chord_id: chord_id.to_string(),
        target: ElementRect::new(top, 20.0),
        current_time: 0.0,
    }
}

#[test]
fn test_manual_override_window() {
    let mut scroll = controller();
    let mut rx = scroll.subscribe();
    let t0 = Instant::now();

    scroll.handle_user_scroll(UserScrollKind::Wheel, t0);
    assert!(scroll.is_manual_override_active(t0));

    assert!(!scroll.handle_chord_change(request("a", 1000.0), t0 + Duration::from_secs(1)));
    assert_eq!(scroll.surface().scroll_top(), 0.0);

    // default override timeout is 3 s
    assert!(scroll.handle_chord_change(request("b", 1000.0), t0 + Duration::from_millis(3100)));
    assert_eq!(scroll.surface().scroll_top(), 810.0);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, ScrollEvent::ManualOverrideStarted)));
    assert!(events.iter().any(|e| matches!(
        e,
        ScrollEvent::ScrollSkipped {
            reason: SkipReason::ManualOverride,
            ..
        }
    )));
    assert!(events.iter().any(|e| matches!(e, ScrollEvent::ManualOverrideEnded)));
}

#[test]
fn test_repeated_user_scroll_extends_override() {
    let mut scroll = controller();
    let t0 = Instant::now();

    scroll.handle_user_scroll(UserScrollKind::Touch, t0);
    scroll.handle_user_scroll(UserScrollKind::Scroll, t0 + Duration::from_secs(2));

    assert!(scroll.is_manual_override_active(t0 + Duration::from_millis(4500)));
    assert!(!scroll.is_manual_override_active(t0 + Duration::from_millis(5100)));
}

#[test]
fn test_emergency_stop_survives_enable() {
    let mut scroll = controller();
    let now = Instant::now();

    scroll.emergency_stop();
    scroll.set_enabled(true);
    assert!(!scroll.handle_chord_change(request("a", 1000.0), now));
    assert!(scroll.is_emergency_stopped());

    scroll.clear_emergency_stop();
    assert!(scroll.handle_chord_change(request("a", 1000.0), now));
}
