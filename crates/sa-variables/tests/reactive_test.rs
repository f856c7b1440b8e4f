//! End-to-end tests of the reactive variable graph
//!
//! These tests wire the store, computed custom variables and blink variables
//! to one event clock, the way the daemon does.

use sa_core::namespaces::{BLINK, CUSTOM};
use sa_core::{
    ClockEvent, ClockEventKind, ControlId, MemoryPersistence, NoLocations, NoRedraw,
    VariableValue,
};
use sa_event_clock::EventClock;
use sa_variables::{
    BlinkSettings, BlinkerScheduler, ComputedDeps, ComputedVariables, CustomVariableDefinition,
    TemplateParser, VariableStore, DEFAULT_CASCADE_MAX_WAIT, DEFAULT_CASCADE_WAIT,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Graph {
    clock: Arc<EventClock>,
    store: Arc<VariableStore>,
    computed: Arc<ComputedVariables>,
}

fn graph() -> Graph {
    let clock = Arc::new(EventClock::new());
    let store = Arc::new(VariableStore::new(clock.clone(), Arc::new(NoLocations)));
    let computed = ComputedVariables::new(ComputedDeps {
        clock: clock.clone(),
        store: store.clone(),
        parser: Arc::new(TemplateParser::new().unwrap()),
        persistence: Arc::new(MemoryPersistence::new()),
        redraw: Arc::new(NoRedraw),
        cascade_wait: DEFAULT_CASCADE_WAIT,
        cascade_max_wait: DEFAULT_CASCADE_MAX_WAIT,
    });
    Graph {
        clock,
        store,
        computed,
    }
}

#[tokio::test(start_paused = true)]
async fn test_chained_custom_variables_propagate() {
    let g = graph();
    g.store
        .set_values("device", [("temp", VariableValue::from(20i64))]);

    g.computed.add(
        ControlId::new("expr:1"),
        CustomVariableDefinition::new("temp_copy", "$(device:temp)"),
    );
    g.computed.add(
        ControlId::new("expr:2"),
        CustomVariableDefinition::new("label", "Temp $(custom:temp_copy)"),
    );
    assert_eq!(
        g.store.get_value(CUSTOM, "label"),
        VariableValue::from("Temp 20")
    );

    g.store
        .set_values("device", [("temp", VariableValue::from(25i64))]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        g.store.get_value(CUSTOM, "temp_copy"),
        VariableValue::from(25i64)
    );
    assert_eq!(
        g.store.get_value(CUSTOM, "label"),
        VariableValue::from("Temp 25")
    );
}

#[tokio::test(start_paused = true)]
async fn test_mutual_dependency_does_not_recurse() {
    let g = graph();
    let batches = Arc::new(Mutex::new(0usize));
    let counter = batches.clone();
    g.clock
        .subscribe(ClockEventKind::VariablesChanged, move |_| {
            *counter.lock().unwrap() += 1;
        });

    g.computed.add(
        ControlId::new("expr:a"),
        CustomVariableDefinition::new("a", "$(custom:b)"),
    );
    g.computed.add(
        ControlId::new("expr:b"),
        CustomVariableDefinition::new("b", "x$(custom:a)"),
    );

    // Each flush grows the values by one character; the debounce spaces the
    // flushes out instead of recursing on the stack.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = *batches.lock().unwrap();
    assert!(seen > 0);
    assert!(seen < 50, "{seen} change batches in 100ms");

    g.computed.destroy();
    let settled = *batches.lock().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*batches.lock().unwrap(), settled);
}

#[tokio::test(start_paused = true)]
async fn test_blink_variable_drives_custom_variable() {
    let g = graph();
    let blinker = BlinkerScheduler::new(g.store.clone(), BlinkSettings::default());

    let key = blinker.track_dependency(1000.0, 0.5);
    g.computed.add(
        ControlId::new("expr:blink"),
        CustomVariableDefinition::new("flash", &format!("$({key})")),
    );

    let first = g.store.get_value(CUSTOM, "flash");
    assert_eq!(first, g.store.get_value(BLINK, "500_500"));

    for _ in 0..600 {
        if g.store.get_value(BLINK, "500_500") != first {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let toggled = g.store.get_value(BLINK, "500_500");
    assert_ne!(toggled, first);
    assert_eq!(g.store.get_value(CUSTOM, "flash"), toggled);
    blinker.shutdown();
}

#[test]
fn test_forgotten_connection_reports_every_key() {
    let g = graph();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    g.clock
        .subscribe(ClockEventKind::VariablesChanged, move |event| {
            if let ClockEvent::VariablesChanged { keys, .. } = event {
                let mut keys: Vec<String> = keys.iter().cloned().collect();
                keys.sort();
                sink.lock().unwrap().push(keys);
            }
        });

    g.store.set_values(
        "obs",
        [
            ("scene", VariableValue::from("Live")),
            ("streaming", VariableValue::from(true)),
        ],
    );
    g.store.forget_namespace("obs", "OBS");

    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[1], vec!["obs:scene", "obs:streaming"]);
}
