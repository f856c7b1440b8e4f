//! Custom variables computed from expressions
//!
//! Expression-variable controls each produce one named value in the `custom`
//! namespace. Several controls may claim the same name; the
//! [`NameConflictRegistry`] decides which one publishes.
//!
//! Recomputation after a dependency change goes through a [`Debouncer`]:
//! changed controls are marked dirty and flushed together, so a control whose
//! expression depends (directly or through others) on its own output never
//! recurses synchronously.

use sa_core::namespaces::CUSTOM;
use sa_core::{
    qualified_key, ClockEvent, ClockEventKind, ControlId, PersistenceError, PersistenceStore,
    RedrawNotifier, VariableValue,
};
use sa_event_clock::{Debouncer, Liveness, ListenerId, SharedEventClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conflict::{ConflictStrategy, NameConflictRegistry};
use crate::parser::ExpressionParser;
use crate::store::VariableStore;

/// Persistence key prefix of custom variable definitions
pub const CUSTOM_VARIABLE_PREFIX: &str = "custom_variable:";

/// Default cascade flush window
pub const DEFAULT_CASCADE_WAIT: Duration = Duration::from_millis(10);

/// Default cascade flush cap
pub const DEFAULT_CASCADE_MAX_WAIT: Duration = Duration::from_millis(50);

/// User-editable definition of a custom variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomVariableDefinition {
    /// Name within the `custom` namespace
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub sort_order: i32,
    /// Persist the last computed value alongside the definition
    #[serde(default)]
    pub persist_value: bool,
}

impl CustomVariableDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            sort_order: 0,
            persist_value: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCustomVariable {
    #[serde(flatten)]
    definition: CustomVariableDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<VariableValue>,
}

#[derive(Debug, Clone)]
struct ComputedEntry {
    definition: CustomVariableDefinition,
    dependencies: HashSet<String>,
    value: VariableValue,
}

/// Collaborators of [`ComputedVariables`]
#[derive(Clone)]
pub struct ComputedDeps {
    pub clock: SharedEventClock,
    pub store: Arc<VariableStore>,
    pub parser: Arc<dyn ExpressionParser>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub redraw: Arc<dyn RedrawNotifier>,
    pub cascade_wait: Duration,
    pub cascade_max_wait: Duration,
}

/// Custom variables produced by expression-variable controls
pub struct ComputedVariables {
    deps: ComputedDeps,
    entries: Mutex<HashMap<ControlId, ComputedEntry>>,
    registry: NameConflictRegistry<ControlId>,
    dirty: Mutex<BTreeSet<ControlId>>,
    cascade: Debouncer,
    liveness: Liveness,
    listener: Mutex<Option<ListenerId>>,
}

struct ComputedStrategy {
    owner: Weak<ComputedVariables>,
}

impl ConflictStrategy<ControlId> for ComputedStrategy {
    fn promoted(&self, owner: &ControlId, _name: &str) {
        if let Some(computed) = self.owner.upgrade() {
            computed.publish_cached(owner);
            computed.recompute(owner);
            computed.deps.redraw.trigger_redraw(owner);
        }
    }

    fn released(&self, name: &str) {
        if let Some(computed) = self.owner.upgrade() {
            computed
                .deps
                .store
                .set_values(CUSTOM, [(name, VariableValue::Undefined)]);
        }
    }
}

impl ComputedVariables {
    /// Create the custom variable producer and subscribe it to variable changes
    pub fn new(deps: ComputedDeps) -> Arc<Self> {
        let liveness = Liveness::new();

        let computed = Arc::new_cyclic(|weak: &Weak<Self>| {
            let strategy = Arc::new(ComputedStrategy {
                owner: weak.clone(),
            });

            let flush_target = weak.clone();
            let cascade = Debouncer::new(
                deps.cascade_wait,
                deps.cascade_max_wait,
                liveness.clone(),
                move || {
                    if let Some(computed) = flush_target.upgrade() {
                        computed.flush();
                    }
                },
            );

            Self {
                deps: deps.clone(),
                entries: Mutex::new(HashMap::new()),
                registry: NameConflictRegistry::new("custom_variable", strategy),
                dirty: Mutex::new(BTreeSet::new()),
                cascade,
                liveness,
                listener: Mutex::new(None),
            }
        });

        let weak = Arc::downgrade(&computed);
        let id = deps
            .clock
            .subscribe(ClockEventKind::VariablesChanged, move |event| {
                if let (Some(computed), ClockEvent::VariablesChanged { keys, .. }) =
                    (weak.upgrade(), event)
                {
                    computed.on_variables_changed(keys);
                }
            });
        *lock(&computed.listener) = Some(id);

        computed
    }

    /// Register a control's custom variable
    ///
    /// Returns whether the control is the active owner of its name.
    pub fn add(&self, control_id: ControlId, definition: CustomVariableDefinition) -> bool {
        let name = definition.name.clone();
        let previous = lock(&self.entries).insert(
            control_id.clone(),
            ComputedEntry {
                definition,
                dependencies: HashSet::new(),
                value: VariableValue::Undefined,
            },
        );

        if let Some(previous) = previous.filter(|p| p.definition.name != name) {
            lock(&self.dirty).remove(&control_id);
            self.registry.remove(&control_id, &previous.definition.name);
        }

        let active = self.registry.add(control_id.clone(), &name);
        info!(control_id = %control_id, name = %name, active, "Added custom variable");

        self.recompute(&control_id);
        self.persist(&control_id);
        active
    }

    /// Unregister a control, promoting a standby owner of its name if any
    pub fn remove(&self, control_id: &ControlId) {
        let Some(entry) = lock(&self.entries).remove(control_id) else {
            return;
        };
        lock(&self.dirty).remove(control_id);

        self.registry.remove(control_id, &entry.definition.name);
        if let Err(e) = self
            .deps
            .persistence
            .delete(&persistence_key(control_id))
        {
            warn!(control_id = %control_id, error = %e, "Failed to delete custom variable");
        }
        info!(control_id = %control_id, name = %entry.definition.name, "Removed custom variable");
    }

    /// Change the name a control publishes under
    pub fn rename(&self, control_id: &ControlId, name: &str) {
        let old = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(control_id) else {
                return;
            };
            if entry.definition.name == name {
                return;
            }
            std::mem::replace(&mut entry.definition.name, name.to_string())
        };

        self.registry.remove(control_id, &old);
        self.registry.add(control_id.clone(), name);
        self.recompute(control_id);
        self.persist(control_id);
    }

    /// Replace a control's expression
    pub fn set_expression(&self, control_id: &ControlId, expression: &str) {
        {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(control_id) else {
                return;
            };
            entry.definition.expression = expression.to_string();
        }
        self.recompute(control_id);
        self.persist(control_id);
    }

    /// Re-evaluate a control's expression, publishing it if the control is active
    pub fn recompute(&self, control_id: &ControlId) {
        let Some(expression) = lock(&self.entries)
            .get(control_id)
            .map(|e| e.definition.expression.clone())
        else {
            return;
        };

        let result = self.deps.store.execute_expression(
            self.deps.parser.as_ref(),
            &expression,
            Some(control_id),
            None,
        );
        let value = result.value.unwrap_or_else(|e| {
            warn!(control_id = %control_id, error = %e, "Custom variable expression failed");
            VariableValue::Undefined
        });

        let (name, persist_value) = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(control_id) else {
                return;
            };
            entry.dependencies = result.variable_ids;
            let changed = entry.value != value;
            entry.value = value.clone();
            (
                entry.definition.name.clone(),
                changed && entry.definition.persist_value,
            )
        };

        if self.registry.active_owner_for(&name).as_ref() == Some(control_id) {
            self.deps
                .store
                .set_values_from(CUSTOM, [(name, value)], Some(control_id.as_str()));
        }
        if persist_value {
            self.persist(control_id);
        }
    }

    /// Recompute every claim from scratch, in control id order
    pub fn rebuild(&self) {
        let claims: Vec<(ControlId, String)> = lock(&self.entries)
            .iter()
            .map(|(id, e)| (id.clone(), e.definition.name.clone()))
            .collect();
        self.registry.rebuild(claims);
    }

    /// Restore every persisted definition and publish the active owners
    pub fn load(&self) -> usize {
        let keys = self
            .deps
            .persistence
            .keys_with_prefix(CUSTOM_VARIABLE_PREFIX);

        let mut loaded = 0;
        for key in keys {
            let Some(raw) = self.deps.persistence.get(&key) else {
                continue;
            };
            let persisted: PersistedCustomVariable = match serde_json::from_value(raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping malformed custom variable");
                    continue;
                }
            };

            let control_id = ControlId::new(&key[CUSTOM_VARIABLE_PREFIX.len()..]);
            let value = if persisted.definition.persist_value {
                persisted.value.unwrap_or_default()
            } else {
                VariableValue::Undefined
            };
            lock(&self.entries).insert(
                control_id,
                ComputedEntry {
                    definition: persisted.definition,
                    dependencies: HashSet::new(),
                    value,
                },
            );
            loaded += 1;
        }

        self.rebuild();
        info!(count = loaded, "Loaded custom variables");
        loaded
    }

    /// Whether a control currently publishes its name
    pub fn is_active(&self, control_id: &ControlId) -> bool {
        self.registry.is_active(control_id)
    }

    /// The control publishing a name
    pub fn active_owner_for(&self, name: &str) -> Option<ControlId> {
        self.registry.active_owner_for(name)
    }

    /// Definitions ordered by sort order, then control id
    pub fn definitions(&self) -> Vec<(ControlId, CustomVariableDefinition)> {
        let mut defs: Vec<(ControlId, CustomVariableDefinition)> = lock(&self.entries)
            .iter()
            .map(|(id, e)| (id.clone(), e.definition.clone()))
            .collect();
        defs.sort_by(|a, b| {
            a.1.sort_order
                .cmp(&b.1.sort_order)
                .then_with(|| a.0.cmp(&b.0))
        });
        defs
    }

    /// Stop reacting to variable changes
    pub fn destroy(&self) {
        self.liveness.cancel();
        self.cascade.cancel();
        if let Some(id) = lock(&self.listener).take() {
            self.deps.clock.unsubscribe(id);
        }
        debug!("Custom variables destroyed");
    }

    fn on_variables_changed(&self, keys: &HashSet<String>) {
        let affected: Vec<ControlId> = lock(&self.entries)
            .iter()
            .filter(|(_, e)| !e.dependencies.is_disjoint(keys))
            .map(|(id, _)| id.clone())
            .collect();

        if affected.is_empty() {
            return;
        }

        lock(&self.dirty).extend(affected);
        self.cascade.request();
    }

    fn flush(&self) {
        let dirty = std::mem::take(&mut *lock(&self.dirty));
        debug!(count = dirty.len(), "Flushing custom variable recomputation");
        for control_id in dirty {
            self.recompute(&control_id);
        }
    }

    fn publish_cached(&self, control_id: &ControlId) {
        let cached = lock(&self.entries)
            .get(control_id)
            .map(|e| (e.definition.name.clone(), e.value.clone()));
        if let Some((name, value)) = cached {
            self.deps
                .store
                .set_values_from(CUSTOM, [(name, value)], Some(control_id.as_str()));
        }
    }

    fn persist(&self, control_id: &ControlId) {
        let Some(entry) = lock(&self.entries).get(control_id).cloned() else {
            return;
        };

        let value = entry
            .definition
            .persist_value
            .then_some(entry.value);
        let persisted = PersistedCustomVariable {
            definition: entry.definition,
            value,
        };

        let key = persistence_key(control_id);
        let result = serde_json::to_value(&persisted)
            .map_err(|source| PersistenceError::Encode {
                key: key.clone(),
                source,
            })
            .and_then(|json| self.deps.persistence.set(&key, json));
        if let Err(e) = result {
            warn!(control_id = %control_id, error = %e, "Failed to persist custom variable");
        }
    }

    /// Fully-qualified key a control publishes under
    pub fn key_for(&self, control_id: &ControlId) -> Option<String> {
        lock(&self.entries)
            .get(control_id)
            .map(|e| qualified_key(CUSTOM, &e.definition.name))
    }
}

fn persistence_key(control_id: &ControlId) -> String {
    format!("{CUSTOM_VARIABLE_PREFIX}{control_id}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
