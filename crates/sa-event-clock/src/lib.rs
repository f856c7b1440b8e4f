//! Event clock with typed synchronous fan-out
//!
//! This crate provides the EventClock, the process-wide heartbeat of the
//! automation core. It emits one `Tick` per elapsed second and doubles as the
//! pub/sub hub for discrete events (startup, client connect, lock state,
//! control presses, variable change batches).
//!
//! Delivery is synchronous: every subscriber of a kind runs, in registration
//! order, before `emit` returns. A panicking subscriber is logged and skipped
//! so it can never starve the others.
//!
//! The crate also hosts the two timer primitives shared by the rest of the
//! workspace: [`Liveness`] tokens and the [`Debouncer`].

mod debounce;
mod liveness;

pub use debounce::Debouncer;
pub use liveness::Liveness;

use chrono::Utc;
use dashmap::DashMap;
use sa_core::{ClockEvent, ClockEventKind};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Default heartbeat period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscriber callback
pub type ClockHandler = Arc<dyn Fn(&ClockEvent) + Send + Sync>;

/// The event clock
///
/// One instance exists per process and is passed by reference (`Arc`) to
/// every dependent. It supports:
/// - Subscribing per [`ClockEventKind`]
/// - Synchronous, ordered emission with per-handler panic isolation
/// - A monotonic 1 Hz heartbeat with `last_tick_time()` for late subscribers
pub struct EventClock {
    /// Subscription table, per event kind in registration order
    listeners: DashMap<ClockEventKind, Vec<(ListenerId, ClockHandler)>>,
    /// Counter for generating unique listener IDs
    next_listener_id: AtomicU64,
    /// Tick count of the most recent heartbeat
    last_tick: AtomicU64,
    /// Wall clock of the most recent heartbeat (Unix ms)
    last_tick_time: AtomicI64,
    /// Running flag of the heartbeat task
    running: AtomicBool,
    /// Heartbeat task handle
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl EventClock {
    /// Create a new event clock
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            last_tick: AtomicU64::new(0),
            last_tick_time: AtomicI64::new(Utc::now().timestamp_millis()),
            running: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    /// Subscribe to events of one kind
    pub fn subscribe(
        &self,
        kind: ClockEventKind,
        handler: impl Fn(&ClockEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        trace!(kind = %kind, listener = id.0, "Subscribing to event kind");
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(listener, _)| *listener != id);
            removed |= entry.len() != before;
        }
        trace!(listener = id.0, removed, "Unsubscribed");
        removed
    }

    /// Deliver an event to every subscriber of its kind
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while being called.
    pub fn emit(&self, event: ClockEvent) {
        let kind = event.kind();
        let handlers: Vec<(ListenerId, ClockHandler)> = self
            .listeners
            .get(&kind)
            .map(|l| l.clone())
            .unwrap_or_default();

        if kind != ClockEventKind::Tick {
            debug!(kind = %kind, subscribers = handlers.len(), "Emitting event");
        }

        for (id, handler) in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    kind = %kind,
                    listener = id.0,
                    error = panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }

    /// Record and emit one heartbeat
    pub fn tick(&self, tick: u64, wall_clock_ms: i64) {
        self.last_tick.store(tick, Ordering::SeqCst);
        self.last_tick_time.store(wall_clock_ms, Ordering::SeqCst);
        trace!(tick, "Tick");
        self.emit(ClockEvent::Tick {
            tick,
            wall_clock_ms,
        });
    }

    /// Tick count of the most recent heartbeat
    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::SeqCst)
    }

    /// Wall clock (Unix ms) of the most recent heartbeat
    pub fn last_tick_time(&self) -> i64 {
        self.last_tick_time.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions over all kinds
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|l| l.len()).sum()
    }

    /// Start the heartbeat
    ///
    /// Each fire recomputes the whole seconds elapsed since start from the
    /// monotonic clock and emits a tick only when that count advanced, so a
    /// suspend/resume produces one tick with the new count rather than a
    /// burst of catch-up ticks.
    pub fn start(self: &Arc<Self>, period: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Event clock already running");
            return;
        }

        info!(period_ms = period.as_millis() as u64, "Starting event clock");

        let clock = Arc::downgrade(self);
        let base_tick = self.last_tick();
        let handle = tokio::spawn(async move {
            let origin = Instant::now();
            let mut interval = tokio::time::interval_at(origin + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(clock) = clock.upgrade() else {
                    break;
                };
                let tick = base_tick + origin.elapsed().as_secs();
                if tick <= clock.last_tick() {
                    trace!(tick, "Heartbeat fired early, skipping");
                    continue;
                }
                clock.tick(tick, Utc::now().timestamp_millis());
            }

            debug!("Event clock heartbeat ended");
        });

        *self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the heartbeat
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping event clock");
        if let Some(handle) = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Check if the heartbeat is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for EventClock
pub type SharedEventClock = Arc<EventClock>;

/// Best-effort text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn recorder(clock: &EventClock, kind: ClockEventKind) -> Arc<Mutex<Vec<ClockEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        clock.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn test_emit_in_registration_order() {
        let clock = EventClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            clock.subscribe(ClockEventKind::Startup, move |_| order.lock().unwrap().push(n));
        }

        clock.emit(ClockEvent::Startup);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_no_cross_kind_delivery() {
        let clock = EventClock::new();
        let startup = recorder(&clock, ClockEventKind::Startup);
        let connects = recorder(&clock, ClockEventKind::ClientConnect);

        clock.emit(ClockEvent::ClientConnect);
        assert!(startup.lock().unwrap().is_empty());
        assert_eq!(connects.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_starve_others() {
        let clock = EventClock::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        clock.subscribe(ClockEventKind::Tick, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        clock.subscribe(ClockEventKind::Tick, |_| panic!("handler failure"));
        let c = count.clone();
        clock.subscribe(ClockEventKind::Tick, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        clock.tick(1, 1_000);
        clock.tick(2, 2_000);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe() {
        let clock = EventClock::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let id = clock.subscribe(ClockEventKind::LockState, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(clock.listener_count(), 1);

        assert!(clock.unsubscribe(id));
        assert!(!clock.unsubscribe(id));
        clock.emit(ClockEvent::LockState { locked: true });
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(clock.listener_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let clock = Arc::new(EventClock::new());
        let inner = clock.clone();
        clock.subscribe(ClockEventKind::Startup, move |_| {
            inner.subscribe(ClockEventKind::Startup, |_| {});
        });

        clock.emit(ClockEvent::Startup);
        assert_eq!(clock.listener_count(), 2);
    }

    #[test]
    fn test_tick_records_last_tick() {
        let clock = EventClock::new();
        let seen = recorder(&clock, ClockEventKind::Tick);

        clock.tick(7, 123_456);
        assert_eq!(clock.last_tick(), 7);
        assert_eq!(clock.last_tick_time(), 123_456);
        assert_eq!(
            seen.lock().unwrap()[0],
            ClockEvent::Tick {
                tick: 7,
                wall_clock_ms: 123_456
            }
        );
    }

    #[test]
    fn test_variables_changed_payload() {
        let clock = EventClock::new();
        let seen = recorder(&clock, ClockEventKind::VariablesChanged);

        let keys: HashSet<String> = ["custom:a".to_string()].into_iter().collect();
        clock.emit(ClockEvent::VariablesChanged {
            keys: keys.clone(),
            origin: None,
        });
        assert_eq!(
            seen.lock().unwrap()[0],
            ClockEvent::VariablesChanged { keys, origin: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_emits_whole_seconds() {
        let clock = Arc::new(EventClock::new());
        let seen = recorder(&clock, ClockEventKind::Tick);

        clock.start(DEFAULT_TICK_INTERVAL);
        assert!(clock.is_running());
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        clock.stop();

        let ticks: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ClockEvent::Tick { tick, .. } => Some(*tick),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![1, 2, 3]);
        assert!(!clock.is_running());
    }
}
