//! Auto-scroll controller
//!
//! Keeps the current chord in view on a [`ScrollSurface`]. All timing takes
//! an explicit `now` so the controller is deterministic under test; the
//! frame driver ([`spawn_scroll_frames`]) supplies real instants.
//!
//! Three independent gates stop automatic scrolling:
//! - `enabled` (config toggle)
//! - emergency stop (sticky until [`AutoScrollController::clear_emergency_stop`])
//! - manual override (timed window armed by user scroll input)

use chordsync_common::events::EventBus;
use chordsync_common::EasingCurve;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::types::{
    AutoScrollConfig, ChordScrollRequest, KeyModifiers, ScrollBehavior, ScrollEvent, ScrollPosition,
    ScrollSurface, SkipReason, SmartScrollContext, UserScrollKind,
};

/// Frame interval of the animation driver (~60 Hz)
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Distances below this are treated as already in position
const MIN_SCROLL_DISTANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
enum Animation {
    Smooth {
        from: f64,
        to: f64,
        started: Instant,
        duration: Duration,
        easing: EasingCurve,
    },
    Progressive {
        to: f64,
        step: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct ActiveScroll {
    chord_id: String,
    animation: Animation,
}

/// Smooth-scroll duration for a distance in pixels
///
/// `(|d| / 2 + 200)` ms capped at 1 s, divided by `speed`, scaled by
/// `0.5 + smoothness`.
pub fn smooth_duration(distance: f64, speed: f64, smoothness: f64) -> Duration {
    let base_ms = (distance.abs() / 2.0 + 200.0).min(1000.0);
    let ms = base_ms / speed.max(0.1) * (0.5 + smoothness.clamp(0.0, 1.0));
    Duration::from_secs_f64(ms / 1000.0)
}

/// Per-frame progressive step, scaled by tempo relative to 120 BPM
pub fn progressive_step(base_step: f64, tempo: Option<f64>) -> f64 {
    let tempo = tempo.filter(|t| *t > 0.0).unwrap_or(120.0);
    (base_step * tempo / 120.0).max(1.0)
}

pub struct AutoScrollController {
    config: AutoScrollConfig,
    surface: Box<dyn ScrollSurface>,
    context: SmartScrollContext,
    events: EventBus<ScrollEvent>,
    active: Option<ActiveScroll>,
    emergency_stopped: bool,
    override_until: Option<Instant>,
    last_position: Option<ScrollPosition>,
    destroyed: bool,
}

impl AutoScrollController {
    pub fn new(config: AutoScrollConfig, surface: Box<dyn ScrollSurface>) -> Self {
        Self {
            events: EventBus::new(config.event_capacity),
            config,
            surface,
            context: SmartScrollContext::default(),
            active: None,
            emergency_stopped: false,
            override_until: None,
            last_position: None,
            destroyed: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScrollEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &AutoScrollConfig {
        &self.config
    }

    /// Toggle auto-scroll; never clears an emergency stop
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        if !enabled {
            self.cancel_animation();
        }
    }

    pub fn set_smart_context(&mut self, context: SmartScrollContext) {
        self.context = context;
    }

    pub fn surface(&self) -> &dyn ScrollSurface {
        self.surface.as_ref()
    }

    pub fn last_position(&self) -> Option<&ScrollPosition> {
        self.last_position.as_ref()
    }

    pub fn is_animating(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_manual_override_active(&self, now: Instant) -> bool {
        self.override_until.is_some_and(|until| now < until)
    }

    fn override_timeout(&self) -> Duration {
        Duration::from_millis(self.config.manual_override_timeout_ms)
    }

    fn expire_override(&mut self, now: Instant) {
        if let Some(until) = self.override_until {
            if now >= until {
                self.override_until = None;
                debug!("Manual override expired");
                self.events.emit_lossy(ScrollEvent::ManualOverrideEnded);
            }
        }
    }

    fn cancel_animation(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Cancelled scroll for chord {}", active.chord_id);
        }
    }

    fn skip(&self, chord_id: &str, reason: SkipReason) -> bool {
        debug!("Scroll for chord {} skipped: {:?}", chord_id, reason);
        self.events.emit_lossy(ScrollEvent::ScrollSkipped {
            chord_id: chord_id.to_string(),
            reason,
        });
        false
    }

    /// Scroll offset that puts the target at `center_threshold` of the
    /// viewport, minus smart-scroll anticipation, clamped to the surface
    pub fn target_offset(&self, request: &ChordScrollRequest) -> f64 {
        let viewport = self.surface.viewport_height();
        let mut target = request.target.center() - viewport * self.config.center_threshold;

        if self.config.smart_scrolling {
            let anticipation = match self.context.tempo_at(request.current_time).filter(|t| *t > 0.0) {
                Some(bpm) => self.config.anticipation_time * bpm / 60.0 * self.config.pixels_per_beat,
                None => self.config.anticipation_offset_px,
            };
            target -= anticipation;
        }

        target.clamp(0.0, self.surface.max_scroll_top())
    }

    /// React to a chord change; returns whether a scroll was started
    pub fn handle_chord_change(&mut self, request: ChordScrollRequest, now: Instant) -> bool {
        self.expire_override(now);

        if self.destroyed || !self.config.enabled {
            return self.skip(&request.chord_id, SkipReason::Disabled);
        }
        if self.emergency_stopped {
            return self.skip(&request.chord_id, SkipReason::EmergencyStopped);
        }
        if self.config.manual_override && self.is_manual_override_active(now) {
            return self.skip(&request.chord_id, SkipReason::ManualOverride);
        }

        let from = self.surface.scroll_top();
        let to = self.target_offset(&request);

        self.last_position = Some(ScrollPosition {
            offset: to,
            timestamp: Utc::now(),
            chord_id: Some(request.chord_id.clone()),
            section_type: self.context.section_at(request.current_time),
        });

        if (to - from).abs() < MIN_SCROLL_DISTANCE {
            self.cancel_animation();
            return self.skip(&request.chord_id, SkipReason::AlreadyInPosition);
        }

        // A new target replaces whatever is in flight
        self.cancel_animation();

        let behavior = self.config.behavior;
        debug!("Scroll {:.0} -> {:.0} ({:?}) for chord {}", from, to, behavior, request.chord_id);
        self.events.emit_lossy(ScrollEvent::ScrollStarted {
            chord_id: request.chord_id.clone(),
            from,
            to,
            behavior,
        });

        match behavior {
            ScrollBehavior::Instant => {
                self.surface.set_scroll_top(to);
                self.events.emit_lossy(ScrollEvent::ScrollCompleted {
                    chord_id: request.chord_id,
                    offset: self.surface.scroll_top(),
                });
            }
            ScrollBehavior::Smooth => {
                self.active = Some(ActiveScroll {
                    chord_id: request.chord_id,
                    animation: Animation::Smooth {
                        from,
                        to,
                        started: now,
                        duration: smooth_duration(to - from, self.config.speed, self.config.smoothness),
                        easing: self.config.easing,
                    },
                });
            }
            ScrollBehavior::Progressive => {
                self.active = Some(ActiveScroll {
                    chord_id: request.chord_id,
                    animation: Animation::Progressive {
                        to,
                        step: progressive_step(
                            self.config.progressive_step_px,
                            self.context.tempo_at(request.current_time),
                        ),
                    },
                });
            }
        }
        true
    }

    /// Advance the in-flight animation; returns whether one is still running
    pub fn on_animation_frame(&mut self, now: Instant) -> bool {
        self.expire_override(now);

        let Some(active) = self.active.as_ref() else {
            return false;
        };

        let done = match &active.animation {
            Animation::Smooth {
                from,
                to,
                started,
                duration,
                easing,
            } => {
                let elapsed = now.saturating_duration_since(*started);
                let t = if duration.is_zero() {
                    1.0
                } else {
                    elapsed.as_secs_f64() / duration.as_secs_f64()
                };
                self.surface.set_scroll_top(easing.interpolate(*from, *to, t));
                t >= 1.0
            }
            Animation::Progressive { to, step } => {
                let current = self.surface.scroll_top();
                let remaining = to - current;
                if remaining.abs() <= *step {
                    self.surface.set_scroll_top(*to);
                    true
                } else {
                    self.surface.set_scroll_top(current + step * remaining.signum());
                    false
                }
            }
        };

        if done {
            if let Some(active) = self.active.take() {
                self.events.emit_lossy(ScrollEvent::ScrollCompleted {
                    chord_id: active.chord_id,
                    offset: self.surface.scroll_top(),
                });
            }
        }
        !done
    }

    /// User-originated scroll input
    ///
    /// Ignored while a programmatic scroll is in flight. Otherwise arms (or
    /// extends) the manual-override window.
    pub fn handle_user_scroll(&mut self, kind: UserScrollKind, now: Instant) {
        if !self.config.manual_override || self.active.is_some() {
            return;
        }
        self.expire_override(now);
        if self.override_until.is_none() {
            debug!("Manual override started by {:?}", kind);
            self.events.emit_lossy(ScrollEvent::ManualOverrideStarted);
        }
        self.override_until = Some(now + self.override_timeout());
    }

    /// Keyboard shortcut handling; Ctrl+Escape triggers the emergency stop
    ///
    /// Returns whether the key was consumed.
    pub fn handle_key(&mut self, key: &str, modifiers: KeyModifiers) -> bool {
        if key == "Escape" && modifiers.ctrl {
            self.emergency_stop();
            return true;
        }
        false
    }

    /// Cancel all animation and block auto-scroll until explicitly cleared
    pub fn emergency_stop(&mut self) {
        self.cancel_animation();
        if !self.emergency_stopped {
            self.emergency_stopped = true;
            warn!("Auto-scroll emergency stop");
            self.events.emit_lossy(ScrollEvent::EmergencyStopped);
        }
    }

    pub fn clear_emergency_stop(&mut self) {
        if self.emergency_stopped {
            self.emergency_stopped = false;
            info!("Auto-scroll emergency stop cleared");
            self.events.emit_lossy(ScrollEvent::EmergencyCleared);
        }
    }

    /// Cancel animation and drop all state. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.cancel_animation();
        self.override_until = None;
        self.last_position = None;
        self.destroyed = true;
    }
}

/// Spawn the animation-frame driver
///
/// Runs until the controller is destroyed.
pub fn spawn_scroll_frames(controller: Arc<Mutex<AutoScrollController>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = tokio::time::Instant::now().into_std();
            let mut controller = controller.lock().unwrap_or_else(|e| e.into_inner());
            if controller.is_destroyed() {
                break;
            }
            controller.on_animation_frame(now);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scroll::types::{ElementRect, VirtualSurface};
    use chordsync_common::events::drain;
    use chordsync_common::timeline::TempoMapping;

    fn controller(behavior: ScrollBehavior) -> AutoScrollController {
        let config = AutoScrollConfig {
            behavior,
            ..Default::default()
        };
        AutoScrollController::new(config, Box::new(VirtualSurface::new(500.0, 5000.0)))
    }

    fn request(id: &str, top: f64) -> ChordScrollRequest {
        ChordScrollRequest {
            chord_id: id.to_string(),
            target: ElementRect::new(top, 20.0),
            current_time: 0.0,
        }
    }

    #[test]
    fn test_target_centers_element() {
        let c = controller(ScrollBehavior::Instant);
        // center 1010 - 0.4 * 500
        assert_eq!(c.target_offset(&request("c", 1000.0)), 810.0);
        // never above the top
        assert_eq!(c.target_offset(&request("c", 10.0)), 0.0);
    }

    #[test]
    fn test_smart_anticipation_uses_tempo() {
        let mut c = controller(ScrollBehavior::Instant);
        c.config.smart_scrolling = true;
        // no tempo: fixed 40 px
        assert_eq!(c.target_offset(&request("c", 1000.0)), 770.0);

        c.set_smart_context(SmartScrollContext {
            tempo: Some(120.0),
            ..Default::default()
        });
        // 0.5 s * 2 beats/s * 24 px
        assert_eq!(c.target_offset(&request("c", 1000.0)), 786.0);
    }

    #[test]
    fn test_tempo_change_applies_at_request_time() {
        let mut c = controller(ScrollBehavior::Progressive);
        c.config.smart_scrolling = true;
        c.set_smart_context(SmartScrollContext {
            tempo: Some(120.0),
            tempo_changes: vec![TempoMapping {
                start_time: 30.0,
                end_time: None,
                bpm: 240.0,
                time_signature: None,
            }],
            ..Default::default()
        });

        assert_eq!(c.target_offset(&request("c", 1000.0)), 786.0);
        let mut later = request("c", 1000.0);
        later.current_time = 35.0;
        // 0.5 s * 4 beats/s * 24 px
        assert_eq!(c.target_offset(&later), 762.0);

        // progressive step doubles from 8 px
        let t0 = Instant::now();
        c.handle_chord_change(later, t0);
        assert!(c.on_animation_frame(t0));
        assert_eq!(c.surface().scroll_top(), 16.0);
    }

    #[test]
    fn test_instant_scroll() {
        let mut c = controller(ScrollBehavior::Instant);
        let mut rx = c.subscribe();
        assert!(c.handle_chord_change(request("c1", 1000.0), Instant::now()));
        assert_eq!(c.surface().scroll_top(), 810.0);
        assert!(!c.is_animating());
        assert_eq!(c.last_position().unwrap().chord_id.as_deref(), Some("c1"));

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(ScrollEvent::ScrollCompleted { .. })));
    }

    #[test]
    fn test_smooth_scroll_reaches_target() {
        let mut c = controller(ScrollBehavior::Smooth);
        let t0 = Instant::now();
        c.handle_chord_change(request("c1", 1000.0), t0);
        assert!(c.is_animating());

        assert!(c.on_animation_frame(t0 + Duration::from_millis(100)));
        let mid = c.surface().scroll_top();
        assert!(mid > 0.0 && mid < 810.0);

        assert!(!c.on_animation_frame(t0 + Duration::from_secs(2)));
        assert_eq!(c.surface().scroll_top(), 810.0);
    }

    #[test]
    fn test_smooth_duration_formula() {
        // (400/2 + 200) ms at speed 1, smoothness 0.5
        assert_eq!(smooth_duration(400.0, 1.0, 0.5), Duration::from_millis(400));
        // capped at 1000 ms, halved by speed 2
        assert_eq!(smooth_duration(-5000.0, 2.0, 0.5), Duration::from_millis(500));
    }

    #[test]
    fn test_progressive_steps_scale_with_tempo() {
        assert_eq!(progressive_step(8.0, None), 8.0);
        assert_eq!(progressive_step(8.0, Some(60.0)), 4.0);

        let mut c = controller(ScrollBehavior::Progressive);
        let t0 = Instant::now();
        c.handle_chord_change(request("c1", 220.0), t0);
        // target 30: 8, 16, 24, 30
        let mut frames = 0;
        while c.on_animation_frame(t0) {
            frames += 1;
        }
        assert_eq!(frames, 3);
        assert_eq!(c.surface().scroll_top(), 30.0);
    }

    #[test]
    fn test_new_target_cancels_in_flight() {
        let mut c = controller(ScrollBehavior::Smooth);
        let t0 = Instant::now();
        c.handle_chord_change(request("c1", 1000.0), t0);
        c.handle_chord_change(request("c2", 3000.0), t0);
        assert!(!c.on_animation_frame(t0 + Duration::from_secs(2)));
        assert_eq!(c.surface().scroll_top(), 2810.0);
    }

    #[test]
    fn test_manual_override_window() {
        let mut c = controller(ScrollBehavior::Instant);
        let t0 = Instant::now();
        let mut rx = c.subscribe();

        c.handle_user_scroll(UserScrollKind::Wheel, t0);
        assert!(!c.handle_chord_change(request("c1", 1000.0), t0 + Duration::from_secs(1)));
        assert_eq!(c.surface().scroll_top(), 0.0);

        assert!(c.handle_chord_change(request("c2", 1000.0), t0 + Duration::from_millis(3100)));
        assert_eq!(c.surface().scroll_top(), 810.0);

        let names: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ScrollEvent::ManualOverrideStarted | ScrollEvent::ManualOverrideEnded))
            .collect();
        assert_eq!(names, vec![ScrollEvent::ManualOverrideStarted, ScrollEvent::ManualOverrideEnded]);
    }

    #[test]
    fn test_manual_input_extends_window() {
        let mut c = controller(ScrollBehavior::Instant);
        let t0 = Instant::now();
        c.handle_user_scroll(UserScrollKind::Touch, t0);
        c.handle_user_scroll(UserScrollKind::Scroll, t0 + Duration::from_secs(2));
        assert!(c.is_manual_override_active(t0 + Duration::from_millis(4500)));
        assert!(!c.is_manual_override_active(t0 + Duration::from_millis(5100)));
    }

    #[test]
    fn test_user_scroll_ignored_during_programmatic_scroll() {
        let mut c = controller(ScrollBehavior::Smooth);
        let t0 = Instant::now();
        c.handle_chord_change(request("c1", 1000.0), t0);
        c.handle_user_scroll(UserScrollKind::Scroll, t0);
        assert!(!c.is_manual_override_active(t0));
    }

    #[test]
    fn test_emergency_stop_is_sticky() {
        let mut c = controller(ScrollBehavior::Smooth);
        let t0 = Instant::now();
        c.handle_chord_change(request("c1", 1000.0), t0);

        assert!(c.handle_key("Escape", KeyModifiers::ctrl()));
        assert!(!c.is_animating());

        c.set_enabled(false);
        c.set_enabled(true);
        assert!(c.is_emergency_stopped());
        assert!(!c.handle_chord_change(request("c2", 2000.0), t0));

        c.clear_emergency_stop();
        assert!(c.handle_chord_change(request("c3", 2000.0), t0));
    }

    #[test]
    fn test_plain_escape_is_not_consumed() {
        let mut c = controller(ScrollBehavior::Smooth);
        assert!(!c.handle_key("Escape", KeyModifiers::default()));
        assert!(!c.is_emergency_stopped());
    }

    #[test]
    fn test_disabled_skips() {
        let mut c = controller(ScrollBehavior::Instant);
        c.set_enabled(false);
        let mut rx = c.subscribe();
        assert!(!c.handle_chord_change(request("c1", 1000.0), Instant::now()));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ScrollEvent::ScrollSkipped {
                reason: SkipReason::Disabled,
                ..
            }]
        ));
    }
}
