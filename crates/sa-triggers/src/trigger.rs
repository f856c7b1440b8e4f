//! The trigger control
//!
//! A [`TriggerControl`] is either disabled or armed. Arming enables both of
//! its event engines; while armed, any qualifying occurrence dispatches
//! `execute_actions`. There is no running state: action runs are
//! fire-and-forget and may overlap.
//!
//! The condition is evaluated externally. A change to anything it reads
//! schedules a debounced recheck; only a change of the boolean (an edge)
//! redraws the trigger and fires its `condition_true`/`condition_false`
//! events. Actions that mutate their own trigger's condition therefore never
//! recurse synchronously.

use chrono::{DateTime, Utc};
use sa_core::{ClockEvent, ClockEventKind, ControlId, EventId, SurfaceId};
use sa_event_clock::{Debouncer, ListenerId, Liveness};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::{ActionDispatcher, ExecutionSource};
use crate::error::TriggerResult;
use crate::event::{TriggerEvent, TriggerModel, TriggerOptions};
use crate::misc::MiscEventEngine;
use crate::ports::{ConditionEvaluator, RunContext, TriggerDeps};
use crate::timer::{instant_from_millis, TimerEventEngine};

struct TriggerInner {
    model: TriggerModel,
    timer: TimerEventEngine,
    misc: MiscEventEngine,
    last_executed: Option<DateTime<Utc>>,
    condition_value: bool,
}

/// One trigger and its event engines
pub struct TriggerControl {
    id: ControlId,
    deps: TriggerDeps,
    inner: Mutex<TriggerInner>,
    condition: Arc<dyn ConditionEvaluator>,
    condition_recheck: Debouncer,
    liveness: Liveness,
    listeners: Mutex<Vec<ListenerId>>,
}

impl TriggerControl {
    /// Build a trigger from its definition and subscribe it to the clock
    ///
    /// Events with an id already used earlier in the list are dropped.
    pub fn new(id: ControlId, mut model: TriggerModel, deps: TriggerDeps) -> Arc<Self> {
        let mut seen = HashSet::new();
        model.events.retain(|event| {
            let unique = seen.insert(event.id.clone());
            if !unique {
                warn!(trigger_id = %id, event_id = %event.id, "Dropping duplicate event id");
            }
            unique
        });

        let liveness = Liveness::new();
        let condition = deps.condition_factory.create(&id);
        let condition_value = condition.check_condition_value();
        let now = Utc::now();

        let trigger = Arc::new_cyclic(|weak: &Weak<Self>| {
            let target = weak.clone();
            let dispatcher = ActionDispatcher::new(
                id.clone(),
                liveness.clone(),
                Arc::new(move |now, source| {
                    if let Some(trigger) = target.upgrade() {
                        trigger.execute_actions(now, source);
                    }
                }),
            );

            let mut timer = TimerEventEngine::new(
                id.clone(),
                deps.zone.clone(),
                dispatcher.clone(),
                deps.clock.last_tick(),
            );
            let mut misc = MiscEventEngine::new(id.clone(), dispatcher);
            for event in &model.events {
                if event.kind.is_timer() {
                    timer.add_event(event, now);
                } else {
                    misc.add_event(event);
                }
            }
            if model.options.enabled {
                timer.set_enabled(true, now);
                misc.set_enabled(true);
            }

            let recheck_target = weak.clone();
            let condition_recheck = Debouncer::new(
                deps.condition_debounce,
                deps.condition_debounce_max,
                liveness.clone(),
                move || {
                    if let Some(trigger) = recheck_target.upgrade() {
                        trigger.recheck_condition();
                    }
                },
            );

            Self {
                id: id.clone(),
                deps: deps.clone(),
                inner: Mutex::new(TriggerInner {
                    model,
                    timer,
                    misc,
                    last_executed: None,
                    condition_value,
                }),
                condition,
                condition_recheck,
                liveness: liveness.clone(),
                listeners: Mutex::new(Vec::new()),
            }
        });

        trigger.subscribe();
        debug!(trigger_id = %trigger.id, "Trigger created");
        trigger
    }

    pub fn id(&self) -> &ControlId {
        &self.id
    }

    /// Snapshot of the current definition
    pub fn to_model(&self) -> TriggerModel {
        self.lock().model.clone()
    }

    pub fn options(&self) -> TriggerOptions {
        self.lock().model.options.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().model.options.enabled
    }

    pub fn last_executed(&self) -> Option<DateTime<Utc>> {
        self.lock().last_executed
    }

    /// Last observed condition value
    pub fn condition_value(&self) -> bool {
        self.lock().condition_value
    }

    /// Arm or disarm both engines
    pub fn set_enabled(&self, enabled: bool, now: DateTime<Utc>) {
        {
            let mut inner = self.lock();
            inner.model.options.enabled = enabled;
            inner.timer.set_enabled(enabled, now);
            inner.misc.set_enabled(enabled);
        }
        info!(trigger_id = %self.id, enabled, "Trigger enabled state changed");
        self.commit();
    }

    /// Replace the user-facing options
    ///
    /// A change of `enabled` arms or disarms the engines.
    pub fn set_options(&self, options: TriggerOptions, now: DateTime<Utc>) {
        {
            let mut inner = self.lock();
            if inner.model.options.enabled != options.enabled {
                inner.timer.set_enabled(options.enabled, now);
                inner.misc.set_enabled(options.enabled);
            }
            inner.model.options = options;
        }
        self.commit();
    }

    /// Replace the action list
    pub fn set_actions(&self, actions: Vec<serde_json::Value>) {
        self.lock().model.actions = actions;
        self.commit();
    }

    /// Append an event
    ///
    /// Returns false, leaving the trigger untouched, when the id is taken.
    pub fn add_event(&self, event: TriggerEvent, now: DateTime<Utc>) -> bool {
        {
            let mut inner = self.lock();
            if inner.model.events.iter().any(|e| e.id == event.id) {
                warn!(trigger_id = %self.id, event_id = %event.id, "Event id already in use");
                return false;
            }
            if event.kind.is_timer() {
                inner.timer.add_event(&event, now);
            } else {
                inner.misc.add_event(&event);
            }
            inner.model.events.push(event);
        }
        self.commit();
        true
    }

    /// Remove an event
    pub fn remove_event(&self, event_id: &EventId) -> bool {
        {
            let mut inner = self.lock();
            let Some(index) = inner.model.events.iter().position(|e| &e.id == event_id) else {
                return false;
            };
            let event = inner.model.events.remove(index);
            if event.kind.is_timer() {
                inner.timer.remove_event(event_id);
            } else {
                inner.misc.remove_event(event_id);
            }
        }
        self.commit();
        true
    }

    /// Enable or disable one event
    pub fn set_event_enabled(&self, event_id: &EventId, enabled: bool, now: DateTime<Utc>) -> bool {
        {
            let mut inner = self.lock();
            let Some(event) = inner.model.events.iter_mut().find(|e| &e.id == event_id) else {
                return false;
            };
            event.enabled = enabled;
            let event = event.clone();
            inner.reconfigure(&event, now);
        }
        self.commit();
        true
    }

    /// Replace an event's type or options, keeping its position
    pub fn update_event(&self, event: TriggerEvent, now: DateTime<Utc>) -> bool {
        {
            let mut inner = self.lock();
            let Some(slot) = inner.model.events.iter_mut().find(|e| e.id == event.id) else {
                return false;
            };
            let was_timer = slot.kind.is_timer();
            *slot = event.clone();

            if was_timer != event.kind.is_timer() {
                if was_timer {
                    inner.timer.remove_event(&event.id);
                } else {
                    inner.misc.remove_event(&event.id);
                }
            }
            inner.reconfigure(&event, now);
        }
        self.commit();
        true
    }

    /// Run the actions for an occurrence
    ///
    /// A test run skips every check. Otherwise the trigger must be enabled,
    /// and unless the occurrence is itself a condition edge the condition
    /// must hold. Returns whether the actions were handed to the runner.
    pub fn execute_actions(&self, now: DateTime<Utc>, source: ExecutionSource) -> bool {
        if source != ExecutionSource::Test {
            if !self.is_enabled() {
                trace!(trigger_id = %self.id, source = %source, "Trigger disabled, skipping");
                return false;
            }
            if source != ExecutionSource::ConditionChanged && !self.condition.check_condition_value() {
                trace!(trigger_id = %self.id, source = %source, "Condition not met, skipping");
                return false;
            }
        }

        let actions = {
            let mut inner = self.lock();
            inner.last_executed = Some(now);
            inner.model.actions.clone()
        };

        let Ok(handle) = Handle::try_current() else {
            warn!(trigger_id = %self.id, source = %source, "No async runtime, actions not run");
            return true;
        };

        let context = RunContext {
            surface_id: SurfaceId::for_trigger(&self.id),
            location: self.deps.locations.location_of(&self.id),
        };
        let runner = self.deps.action_runner.clone();
        let trigger_id = self.id.clone();
        debug!(trigger_id = %trigger_id, source = %source, count = actions.len(), "Running trigger actions");

        handle.spawn(async move {
            if let Err(e) = runner.run_actions(&actions, context).await {
                error!(trigger_id = %trigger_id, source = %source, error = %e, "Trigger actions failed");
            }
        });
        true
    }

    /// Something the condition reads changed; recheck it shortly
    pub fn condition_dependencies_changed(&self) {
        self.condition_recheck.request();
    }

    /// Unsubscribe from the clock and drop pending work
    pub fn destroy(&self) {
        self.liveness.cancel();
        self.condition_recheck.cancel();
        let listeners = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner));
        for id in listeners {
            self.deps.clock.unsubscribe(id);
        }

        let mut inner = self.lock();
        inner.timer.set_enabled(false, Utc::now());
        inner.misc.set_enabled(false);
        debug!(trigger_id = %self.id, "Trigger destroyed");
    }

    fn recheck_condition(&self) {
        let value = self.condition.check_condition_value();
        {
            let mut inner = self.lock();
            if inner.condition_value == value {
                return;
            }
            inner.condition_value = value;
        }

        debug!(trigger_id = %self.id, value, "Condition changed");
        self.deps.redraw.trigger_redraw(&self.id);
        self.lock().misc.on_condition_changed(value);
    }

    fn subscribe(self: &Arc<Self>) {
        let clock = &self.deps.clock;
        let mut ids = Vec::new();

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::Tick, move |event| {
            if let (Some(trigger), ClockEvent::Tick { tick, wall_clock_ms }) = (weak.upgrade(), event) {
                trigger.lock().timer.on_tick(*tick, instant_from_millis(*wall_clock_ms));
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::Startup, move |_| {
            if let Some(trigger) = weak.upgrade() {
                trigger.lock().misc.on_startup();
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::ClientConnect, move |_| {
            if let Some(trigger) = weak.upgrade() {
                trigger.lock().misc.on_client_connect();
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::LockState, move |event| {
            if let (Some(trigger), ClockEvent::LockState { locked }) = (weak.upgrade(), event) {
                trigger.lock().misc.on_lock_state(*locked);
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::ControlPress, move |event| {
            if let (Some(trigger), ClockEvent::ControlPress { pressed, surface_id, .. }) =
                (weak.upgrade(), event)
            {
                trigger.lock().misc.on_control_press(*pressed, surface_id.as_ref());
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::VariablesChanged, move |event| {
            if let (Some(trigger), ClockEvent::VariablesChanged { keys, .. }) = (weak.upgrade(), event) {
                trigger.lock().misc.on_variables_changed(keys);
                if !trigger.condition.referenced_variables().is_disjoint(keys) {
                    trigger.condition_dependencies_changed();
                }
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(clock.subscribe(ClockEventKind::LocalVariablesChanged, move |event| {
            if let (Some(trigger), ClockEvent::LocalVariablesChanged { control_id, .. }) =
                (weak.upgrade(), event)
            {
                if control_id == &trigger.id {
                    trigger.condition_dependencies_changed();
                }
            }
        }));

        *self.listeners.lock().unwrap_or_else(PoisonError::into_inner) = ids;
    }

    /// Persist the current definition, logging failures
    fn commit(&self) {
        if let Err(e) = self.persist() {
            warn!(trigger_id = %self.id, error = %e, "Failed to persist trigger");
        }
    }

    pub(crate) fn persist(&self) -> TriggerResult<()> {
        let model = self.to_model();
        let value = serde_json::to_value(&model).map_err(|source| {
            sa_core::PersistenceError::Encode {
                key: self.id.to_string(),
                source,
            }
        })?;
        self.deps.persistence.set(self.id.as_str(), value)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, TriggerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TriggerInner {
    /// Re-read one event into the engine that owns its kind
    fn reconfigure(&mut self, event: &TriggerEvent, now: DateTime<Utc>) {
        if event.kind.is_timer() {
            self.timer.replace_event(event, now);
        } else {
            self.misc.replace_event(event);
        }
    }
}

impl std::fmt::Debug for TriggerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerControl")
            .field("id", &self.id)
            .field("alive", &self.liveness.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::event::{EventKind, IntervalOptions, NoOptions};
    use crate::ports::{ActionRunner, ConditionFactory};
    use async_trait::async_trait;
    use sa_core::{MemoryPersistence, PersistenceStore, RedrawNotifier};
    use sa_event_clock::EventClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Action runner recording every run
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub runs: Mutex<Vec<(usize, RunContext)>>,
    }

    impl RecordingRunner {
        pub fn count(&self) -> usize {
            self.runs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ActionRunner for RecordingRunner {
        async fn run_actions(
            &self,
            actions: &[serde_json::Value],
            context: RunContext,
        ) -> Result<(), ActionError> {
            self.runs.lock().unwrap().push((actions.len(), context));
            Ok(())
        }
    }

    /// Condition backed by a flag the test flips
    pub(crate) struct FlagCondition {
        pub value: Arc<AtomicBool>,
    }

    impl ConditionEvaluator for FlagCondition {
        fn check_condition_value(&self) -> bool {
            self.value.load(Ordering::SeqCst)
        }

        fn referenced_variables(&self) -> HashSet<String> {
            ["custom:gate".to_string()].into()
        }
    }

    impl ConditionFactory for FlagCondition {
        fn create(&self, _trigger_id: &ControlId) -> Arc<dyn ConditionEvaluator> {
            Arc::new(FlagCondition {
                value: self.value.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingRedraw(Mutex<Vec<ControlId>>);

    impl RedrawNotifier for RecordingRedraw {
        fn trigger_redraw(&self, control_id: &ControlId) {
            self.0.lock().unwrap().push(control_id.clone());
        }
    }

    struct Fixture {
        clock: Arc<EventClock>,
        runner: Arc<RecordingRunner>,
        persistence: Arc<MemoryPersistence>,
        gate: Arc<AtomicBool>,
        redraw: Arc<RecordingRedraw>,
        deps: TriggerDeps,
    }

    fn fixture(gate: bool) -> Fixture {
        let clock = Arc::new(EventClock::new());
        let runner = Arc::new(RecordingRunner::default());
        let persistence = Arc::new(MemoryPersistence::new());
        let gate = Arc::new(AtomicBool::new(gate));
        let redraw = Arc::new(RecordingRedraw::default());
        let deps = TriggerDeps::builder()
            .clock(clock.clone())
            .action_runner(runner.clone())
            .persistence(persistence.clone())
            .condition_factory(Arc::new(FlagCondition { value: gate.clone() }))
            .redraw(redraw.clone())
            .zone(Arc::new(Utc))
            .build()
            .unwrap();
        Fixture {
            clock,
            runner,
            persistence,
            gate,
            redraw,
            deps,
        }
    }

    fn model(events: Vec<TriggerEvent>) -> TriggerModel {
        TriggerModel {
            options: TriggerOptions::default(),
            events,
            actions: vec![json!({"action": "press", "control": "bank:1"})],
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_one_period_after_enable() {
        let f = fixture(true);
        let trigger = TriggerControl::new(
            ControlId::new("trigger:interval"),
            model(vec![TriggerEvent::new(EventKind::Interval(IntervalOptions { seconds: 5 }))]),
            f.deps.clone(),
        );

        for tick in 1..=9 {
            f.clock.tick(tick, 0);
        }
        settle().await;
        assert_eq!(f.runner.count(), 0);

        trigger.set_enabled(true, Utc::now());
        for tick in 10..=14 {
            f.clock.tick(tick, 0);
        }
        settle().await;
        assert_eq!(f.runner.count(), 0);

        let wall_clock_ms = 1_717_000_000_000;
        f.clock.tick(15, wall_clock_ms);
        settle().await;
        assert_eq!(f.runner.count(), 1);
        assert_eq!(trigger.last_executed(), Some(instant_from_millis(wall_clock_ms)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_actions_checks() {
        let f = fixture(false);
        let trigger = TriggerControl::new(ControlId::new("trigger:checks"), model(vec![]), f.deps.clone());
        let now = Utc::now();

        // Disabled: only a test run goes through
        assert!(!trigger.execute_actions(now, ExecutionSource::Timer));
        assert!(trigger.execute_actions(now, ExecutionSource::Test));

        // Enabled, condition false: only a condition edge goes through
        trigger.set_enabled(true, now);
        assert!(!trigger.execute_actions(now, ExecutionSource::ButtonPress));
        assert!(trigger.execute_actions(now, ExecutionSource::ConditionChanged));

        f.gate.store(true, Ordering::SeqCst);
        assert!(trigger.execute_actions(now, ExecutionSource::ButtonPress));

        settle().await;
        let runs = f.runner.runs.lock().unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].0, 1);
        assert_eq!(runs[0].1.surface_id, SurfaceId::new("trigger:checks"));
        assert!(runs[0].1.location.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_edge_debounced() {
        let f = fixture(false);
        let mut definition = model(vec![TriggerEvent::new(EventKind::ConditionTrue(NoOptions {}))]);
        definition.options.enabled = true;
        let trigger = TriggerControl::new(ControlId::new("trigger:edge"), definition, f.deps.clone());

        f.gate.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            f.clock.emit(ClockEvent::VariablesChanged {
                keys: ["custom:gate".to_string()].into(),
                origin: None,
            });
        }
        // Unrelated keys do not schedule a recheck
        f.clock.emit(ClockEvent::VariablesChanged {
            keys: ["custom:other".to_string()].into(),
            origin: None,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(trigger.condition_value());
        assert_eq!(f.redraw.0.lock().unwrap().len(), 1);
        assert_eq!(f.runner.count(), 1);

        // No edge, no execution
        trigger.condition_dependencies_changed();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.redraw.0.lock().unwrap().len(), 1);
        assert_eq!(f.runner.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_press_does_not_start_press_trigger() {
        let f = fixture(true);
        let mut definition = model(vec![TriggerEvent::new(EventKind::ButtonPress(NoOptions {}))]);
        definition.options.enabled = true;
        let _trigger = TriggerControl::new(ControlId::new("trigger:press"), definition, f.deps.clone());

        f.clock.emit(ClockEvent::ControlPress {
            control_id: ControlId::new("bank:1"),
            pressed: true,
            surface_id: Some(SurfaceId::new("trigger:other")),
        });
        settle().await;
        assert_eq!(f.runner.count(), 0);

        f.clock.emit(ClockEvent::ControlPress {
            control_id: ControlId::new("bank:1"),
            pressed: true,
            surface_id: Some(SurfaceId::new("streamdeck:1")),
        });
        settle().await;
        assert_eq!(f.runner.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_unsubscribes_and_drops_pending() {
        let f = fixture(true);
        let mut definition = model(vec![TriggerEvent::new(EventKind::Startup(
            crate::event::DelayOptions { delay: 100 },
        ))]);
        definition.options.enabled = true;
        let trigger = TriggerControl::new(ControlId::new("trigger:gone"), definition, f.deps.clone());
        assert_eq!(f.clock.listener_count(), 7);

        f.clock.emit(ClockEvent::Startup);
        trigger.destroy();
        assert_eq!(f.clock.listener_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.runner.count(), 0);
    }

    #[tokio::test]
    async fn test_event_crud_is_persisted() {
        let f = fixture(true);
        let id = ControlId::new("trigger:crud");
        let trigger = TriggerControl::new(id.clone(), model(vec![]), f.deps.clone());
        let now = Utc::now();

        let event = TriggerEvent::new(EventKind::ComputerLocked(NoOptions {})).with_id("lock");
        assert!(trigger.add_event(event.clone(), now));
        assert!(!trigger.add_event(event, now));
        assert!(trigger.set_event_enabled(&EventId::new("lock"), false, now));
        assert!(!trigger.set_event_enabled(&EventId::new("missing"), false, now));

        let stored: TriggerModel = serde_json::from_value(f.persistence.get(id.as_str()).unwrap()).unwrap();
        assert_eq!(stored.events.len(), 1);
        assert!(!stored.events[0].enabled);

        let interval = TriggerEvent::new(EventKind::Interval(IntervalOptions { seconds: 3 })).with_id("lock");
        assert!(trigger.update_event(interval, now));
        assert!(trigger.remove_event(&EventId::new("lock")));
        assert!(!trigger.remove_event(&EventId::new("lock")));
        assert!(trigger.to_model().events.is_empty());
    }

    #[test]
    fn test_duplicate_event_ids_dropped_on_build() {
        let f = fixture(true);
        let events = vec![
            TriggerEvent::new(EventKind::ComputerLocked(NoOptions {})).with_id("x"),
            TriggerEvent::new(EventKind::ComputerUnlocked(NoOptions {})).with_id("x"),
        ];
        let trigger = TriggerControl::new(ControlId::new("trigger:dup"), model(events), f.deps.clone());
        let model = trigger.to_model();
        assert_eq!(model.events.len(), 1);
        assert_eq!(model.events[0].kind.type_name(), "computer_locked");
    }
}
