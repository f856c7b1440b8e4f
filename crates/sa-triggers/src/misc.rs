//! Discrete trigger events
//!
//! Startup, client connect, control press/release, lock state, condition
//! edges and watched variable changes. Every matching occurrence schedules its
//! own deferred run of the actions; occurrences are never coalesced.

use sa_core::{ControlId, EventId, SurfaceId};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::trace;

use crate::dispatch::{ActionDispatcher, ExecutionSource};
use crate::event::{EventKind, TriggerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Startup,
    ClientConnect,
    ButtonPress,
    ButtonDepress,
    ConditionTrue,
    ConditionFalse,
    ComputerLocked,
    ComputerUnlocked,
    VariableChanged,
}

impl Family {
    fn source(self) -> ExecutionSource {
        match self {
            Self::Startup => ExecutionSource::Startup,
            Self::ClientConnect => ExecutionSource::ClientConnect,
            Self::ButtonPress => ExecutionSource::ButtonPress,
            Self::ButtonDepress => ExecutionSource::ButtonDepress,
            Self::ConditionTrue | Self::ConditionFalse => ExecutionSource::ConditionChanged,
            Self::ComputerLocked => ExecutionSource::ComputerLocked,
            Self::ComputerUnlocked => ExecutionSource::ComputerUnlocked,
            Self::VariableChanged => ExecutionSource::VariableChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DiscreteEvent {
    family: Family,
    delay: Duration,
    /// Watched key for variable-changed events
    variable: Option<String>,
}

/// Discrete events of one trigger
#[derive(Debug)]
pub struct MiscEventEngine {
    trigger_id: ControlId,
    dispatcher: ActionDispatcher,
    enabled: bool,
    events: BTreeMap<EventId, DiscreteEvent>,
}

impl MiscEventEngine {
    pub fn new(trigger_id: ControlId, dispatcher: ActionDispatcher) -> Self {
        Self {
            trigger_id,
            dispatcher,
            enabled: false,
            events: BTreeMap::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start tracking an event; timer and disabled events are ignored
    pub fn add_event(&mut self, event: &TriggerEvent) {
        if !event.enabled {
            return;
        }

        let (family, delay, variable) = match &event.kind {
            EventKind::Startup(options) => (Family::Startup, options.delay, None),
            EventKind::ClientConnect(options) => (Family::ClientConnect, options.delay, None),
            EventKind::ButtonPress(_) => (Family::ButtonPress, 0, None),
            EventKind::ButtonDepress(_) => (Family::ButtonDepress, 0, None),
            EventKind::ConditionTrue(_) => (Family::ConditionTrue, 0, None),
            EventKind::ConditionFalse(_) => (Family::ConditionFalse, 0, None),
            EventKind::ComputerLocked(_) => (Family::ComputerLocked, 0, None),
            EventKind::ComputerUnlocked(_) => (Family::ComputerUnlocked, 0, None),
            EventKind::VariableChanged(options) => {
                (Family::VariableChanged, 0, Some(options.variable_id.clone()))
            }
            _ => return,
        };

        self.events.insert(
            event.id.clone(),
            DiscreteEvent {
                family,
                delay: Duration::from_millis(delay),
                variable,
            },
        );
    }

    pub fn remove_event(&mut self, id: &EventId) {
        self.events.remove(id);
    }

    /// Re-read an event's configuration
    pub fn replace_event(&mut self, event: &TriggerEvent) {
        self.remove_event(&event.id);
        self.add_event(event);
    }

    /// Number of tracked events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn on_startup(&self) -> usize {
        self.fire(|e| e.family == Family::Startup)
    }

    pub fn on_client_connect(&self) -> usize {
        self.fire(|e| e.family == Family::ClientConnect)
    }

    pub fn on_lock_state(&self, locked: bool) -> usize {
        let family = if locked {
            Family::ComputerLocked
        } else {
            Family::ComputerUnlocked
        };
        self.fire(|e| e.family == family)
    }

    /// Any control pressed or released
    ///
    /// Presses coming from a trigger's own action runs are ignored, so one
    /// trigger pressing a button cannot start another press-driven trigger.
    pub fn on_control_press(&self, pressed: bool, surface_id: Option<&SurfaceId>) -> usize {
        if surface_id.is_some_and(SurfaceId::is_trigger) {
            trace!(trigger_id = %self.trigger_id, "Ignoring press from a trigger surface");
            return 0;
        }

        let family = if pressed {
            Family::ButtonPress
        } else {
            Family::ButtonDepress
        };
        self.fire(|e| e.family == family)
    }

    /// A batch of fully-qualified keys changed
    pub fn on_variables_changed(&self, keys: &HashSet<String>) -> usize {
        self.fire(|e| {
            e.family == Family::VariableChanged
                && e.variable.as_ref().is_some_and(|key| keys.contains(key))
        })
    }

    /// The trigger's condition changed to `value`
    pub fn on_condition_changed(&self, value: bool) -> usize {
        let family = if value {
            Family::ConditionTrue
        } else {
            Family::ConditionFalse
        };
        self.fire(|e| e.family == family)
    }

    fn fire(&self, matches: impl Fn(&DiscreteEvent) -> bool) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut count = 0;
        for event in self.events.values().filter(|e| matches(e)) {
            self.dispatcher
                .dispatch_after(event.delay, event.family.source());
            count += 1;
        }
        count
    }
}
