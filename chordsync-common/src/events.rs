//! Typed event distribution for chordsync components
//!
//! Every engine component (playback, sync, scroll, metronome, practice)
//! defines its own event enum with one tagged variant per event name and
//! publishes it through an [`EventBus`] parameterized by that enum. Handlers
//! match exhaustively instead of downcasting untyped payloads.

use tokio::sync::broadcast;

/// Stable wire name of an event (e.g. `sync:chordchange`)
///
/// Used for logging and for hosts that forward events to a UI layer by name.
pub trait NamedEvent {
    fn event_name(&self) -> &'static str;
}

/// Central event distribution bus for one component's events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Capacity Recommendations
///
/// - Interactive hosts: 256
/// - Testing: 16-64
///
/// # Examples
///
/// ```
/// use chordsync_common::events::EventBus;
///
/// #[derive(Debug, Clone, PartialEq)]
/// enum Ping {
///     Hello(u32),
/// }
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(Ping::Hello(7));
/// assert_eq!(rx.try_recv().unwrap(), Ping::Hello(7));
/// ```
#[derive(Clone)]
pub struct EventBus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Components use this for every event: having no listener is a
    /// normal condition (headless runs, tests that only inspect state).
    pub fn emit_lossy(&self, event: E) {
        let _ = self.tx.send(event);
    }
}

/// Drain every event currently buffered in a receiver
///
/// Skips over lag notifications; stops at the first empty/closed result.
/// Mostly useful in synchronous code and tests that inspect what a
/// single call emitted.
pub fn drain<E: Clone>(rx: &mut broadcast::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Started,
        Progress(u64),
    }

    impl NamedEvent for TestEvent {
        fn event_name(&self) -> &'static str {
            match self {
                TestEvent::Started => "test:started",
                TestEvent::Progress(_) => "test:progress",
            }
        }
    }

    #[test]
    fn test_eventbus_zero_capacity_is_bumped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.emit_lossy(TestEvent::Started);
        assert_eq!(rx.try_recv().unwrap(), TestEvent::Started);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        bus.emit_lossy(TestEvent::Started);

        // late subscribers see only later events
        let mut rx = bus.subscribe();
        bus.emit_lossy(TestEvent::Progress(1));
        assert_eq!(drain(&mut rx), vec![TestEvent::Progress(1)]);
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit_lossy(TestEvent::Progress(42));

        assert_eq!(rx1.try_recv().unwrap(), TestEvent::Progress(42));
        assert_eq!(rx2.try_recv().unwrap().event_name(), "test:progress");
    }

    #[test]
    fn test_drain_collects_in_order_and_skips_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit_lossy(TestEvent::Progress(i));
        }

        // Capacity 2: only the two newest survive
        let events = drain(&mut rx);
        assert_eq!(events, vec![TestEvent::Progress(3), TestEvent::Progress(4)]);
        assert!(drain(&mut rx).is_empty());
    }
}
