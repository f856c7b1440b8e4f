//! Triggers wired to a live event clock and variable store
//!
//! The condition of these triggers reads the variable store, and their
//! actions write back into it, as expression-driven triggers do in the
//! daemon.

use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};
use sa_core::namespaces::CUSTOM;
use sa_core::{ClockEvent, ControlId, MemoryPersistence, NoLocations, VariableValue};
use sa_event_clock::EventClock;
use sa_triggers::{
    ActionError, ActionRunner, ConditionEvaluator, ConditionFactory, EventKind, NoOptions,
    RunContext, SpecificDateOptions, TriggerDeps, TriggerEvent, TriggerManager, TriggerModel,
    TriggerOptions,
};
use sa_variables::VariableStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Condition: `custom:gate` is true
struct GateCondition {
    store: Arc<VariableStore>,
}

impl ConditionEvaluator for GateCondition {
    fn check_condition_value(&self) -> bool {
        self.store.get_value(CUSTOM, "gate") == VariableValue::Boolean(true)
    }

    fn referenced_variables(&self) -> HashSet<String> {
        ["custom:gate".to_string()].into()
    }
}

impl ConditionFactory for GateCondition {
    fn create(&self, _trigger_id: &ControlId) -> Arc<dyn ConditionEvaluator> {
        Arc::new(GateCondition {
            store: self.store.clone(),
        })
    }
}

/// Actions that briefly drop the gate and raise it again
struct GateFlapper {
    store: Arc<VariableStore>,
    runs: AtomicUsize,
}

#[async_trait]
impl ActionRunner for GateFlapper {
    async fn run_actions(
        &self,
        _actions: &[serde_json::Value],
        _context: RunContext,
    ) -> Result<(), ActionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.store.set_values(CUSTOM, [("gate", VariableValue::from(false))]);
        self.store.set_values(CUSTOM, [("gate", VariableValue::from(true))]);
        Ok(())
    }
}

struct Harness {
    clock: Arc<EventClock>,
    store: Arc<VariableStore>,
    runner: Arc<GateFlapper>,
    manager: TriggerManager,
}

fn harness() -> Harness {
    let clock = Arc::new(EventClock::new());
    let store = Arc::new(VariableStore::new(clock.clone(), Arc::new(NoLocations)));
    let runner = Arc::new(GateFlapper {
        store: store.clone(),
        runs: AtomicUsize::new(0),
    });
    let deps = TriggerDeps::builder()
        .clock(clock.clone())
        .action_runner(runner.clone())
        .condition_factory(Arc::new(GateCondition {
            store: store.clone(),
        }))
        .persistence(Arc::new(MemoryPersistence::new()))
        .zone(Arc::new(FixedOffset::east_opt(2 * 3600).unwrap()))
        .build()
        .unwrap();

    Harness {
        clock,
        store,
        runner,
        manager: TriggerManager::new(deps),
    }
}

fn enabled(events: Vec<TriggerEvent>) -> TriggerModel {
    TriggerModel {
        options: TriggerOptions {
            enabled: true,
            ..TriggerOptions::default()
        },
        events,
        actions: vec![serde_json::json!({"action": "flap"})],
    }
}

#[tokio::test(start_paused = true)]
async fn test_actions_mutating_own_condition_do_not_loop() {
    let h = harness();
    let trigger = h
        .manager
        .create(enabled(vec![
            TriggerEvent::new(EventKind::ConditionTrue(NoOptions {})),
            TriggerEvent::new(EventKind::ConditionFalse(NoOptions {})),
        ]))
        .unwrap();

    h.store.set_values(CUSTOM, [("gate", VariableValue::from(true))]);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // One edge, one run; the flap inside the run coalesces into no edge
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);
    assert!(trigger.condition_value());
}

#[tokio::test(start_paused = true)]
async fn test_condition_blocks_discrete_events() {
    let h = harness();
    h.manager
        .create(enabled(vec![TriggerEvent::new(EventKind::ComputerLocked(
            NoOptions {},
        ))]))
        .unwrap();

    h.clock.emit(ClockEvent::LockState { locked: true });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 0);

    h.store.set_values(CUSTOM, [("gate", VariableValue::from(true))]);
    h.clock.emit(ClockEvent::LockState { locked: true });
    h.clock.emit(ClockEvent::LockState { locked: false });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_specific_date_fires_once_from_ticks() {
    let h = harness();
    h.store.set_values(CUSTOM, [("gate", VariableValue::from(true))]);
    let trigger = h
        .manager
        .create(enabled(vec![TriggerEvent::new(EventKind::SpecificDate(
            SpecificDateOptions {
                date: "2099-01-01".to_string(),
                time: "10:00".to_string(),
            },
        ))]))
        .unwrap();

    // 10:00 at UTC+2
    let due = Utc.with_ymd_and_hms(2099, 1, 1, 8, 0, 0).unwrap();
    let before = due - chrono::TimeDelta::seconds(1);

    h.clock.tick(1, before.timestamp_millis());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 0);

    h.clock.tick(2, due.timestamp_millis());
    h.clock.tick(3, due.timestamp_millis() + 1000);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.runner.runs.load(Ordering::SeqCst), 1);
    assert!(trigger.last_executed().is_some());
}
