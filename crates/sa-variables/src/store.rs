//! Canonical variable table with batched change notification

use sa_core::namespaces::{INTERNAL, LOCAL, THIS};
use sa_core::{
    qualified_key, split_qualified_key, ClockEvent, ControlId, PageLocationLookup, ValueType,
    VariableValue, UNKNOWN_SENTINEL,
};
use sa_event_clock::SharedEventClock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, trace};

use crate::parser::{ExecuteResult, ExpressionParser, ParseResult};

type Table<K> = HashMap<K, HashMap<String, VariableValue>>;

/// The variable store holds every published variable value
///
/// The VariableStore is responsible for:
/// - Storing values as namespace → name → value
/// - Diffing writes by value equality and emitting one `VariablesChanged`
///   batch per call, after the table lock has been released
/// - Holding per-control local variables
/// - Building the location-derived `this:` variables for parse/evaluate calls
///
/// An absent key and [`VariableValue::Undefined`] are the same thing: writing
/// undefined removes the key, and writing undefined to an absent key is not
/// a change.
pub struct VariableStore {
    values: Mutex<Table<String>>,
    local_values: Mutex<Table<ControlId>>,
    clock: SharedEventClock,
    locations: Arc<dyn PageLocationLookup>,
}

impl VariableStore {
    pub fn new(clock: SharedEventClock, locations: Arc<dyn PageLocationLookup>) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            local_values: Mutex::new(HashMap::new()),
            clock,
            locations,
        }
    }

    /// Write a batch of values into one namespace
    ///
    /// Returns the fully-qualified keys that changed. Nothing is emitted when
    /// no value changed.
    #[instrument(skip(self, entries), fields(namespace = %namespace))]
    pub fn set_values<N, I>(&self, namespace: &str, entries: I) -> HashSet<String>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, VariableValue)>,
    {
        self.set_values_from(namespace, entries, None)
    }

    /// Write a batch of values, tagging the change event with its producer
    pub fn set_values_from<N, I>(
        &self,
        namespace: &str,
        entries: I,
        origin: Option<&str>,
    ) -> HashSet<String>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, VariableValue)>,
    {
        let changed = {
            let mut values = lock(&self.values);
            let changed = apply_batch(&mut values, namespace.to_string(), entries, |name| {
                qualified_key(namespace, name)
            });
            if values.get(namespace).is_some_and(HashMap::is_empty) {
                values.remove(namespace);
            }
            changed
        };

        debug!(changed = changed.len(), "Set variable values");
        self.emit_changed(changed.clone(), origin);
        changed
    }

    /// Current value of a variable, undefined when absent
    pub fn get_value(&self, namespace: &str, name: &str) -> VariableValue {
        lock(&self.values)
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Current value for a fully-qualified `namespace:name` key
    pub fn get_by_key(&self, key: &str) -> VariableValue {
        match split_qualified_key(key) {
            Some((namespace, name)) => self.get_value(namespace, name),
            None => VariableValue::Undefined,
        }
    }

    /// Snapshot of every value in a namespace
    pub fn namespace_values(&self, namespace: &str) -> HashMap<String, VariableValue> {
        lock(&self.values)
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Check if a namespace currently holds any value
    pub fn has_namespace(&self, namespace: &str) -> bool {
        lock(&self.values).contains_key(namespace)
    }

    /// Clear every value of a namespace and delete it
    ///
    /// Every key the namespace held is reported as changed (to undefined)
    /// before the namespace disappears.
    #[instrument(skip(self), fields(namespace = %namespace))]
    pub fn forget_namespace(&self, namespace: &str, label: &str) -> HashSet<String> {
        let changed: HashSet<String> = lock(&self.values)
            .remove(namespace)
            .map(|ns| {
                ns.into_keys()
                    .map(|name| qualified_key(namespace, &name))
                    .collect()
            })
            .unwrap_or_default();

        debug!(label, cleared = changed.len(), "Forgot variable namespace");
        self.emit_changed(changed.clone(), None);
        changed
    }

    /// Move every value of `from` into `to`
    ///
    /// Both the old and the new fully-qualified keys are reported, so readers
    /// bound to either form re-resolve.
    #[instrument(skip(self))]
    pub fn rename_namespace(&self, from: &str, to: &str) -> HashSet<String> {
        if from == to {
            return HashSet::new();
        }

        let mut changed = HashSet::new();
        {
            let mut values = lock(&self.values);
            if let Some(moved) = values.remove(from) {
                let target = values.entry(to.to_string()).or_default();
                for (name, value) in moved {
                    changed.insert(qualified_key(from, &name));
                    changed.insert(qualified_key(to, &name));
                    target.insert(name, value);
                }
            }
        }

        debug!(changed = changed.len(), "Renamed variable namespace");
        self.emit_changed(changed.clone(), None);
        changed
    }

    /// Write a batch of local variables of one control
    pub fn set_local_values<N, I>(&self, control_id: &ControlId, entries: I) -> HashSet<String>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, VariableValue)>,
    {
        let changed = {
            let mut locals = lock(&self.local_values);
            let changed = apply_batch(&mut locals, control_id.clone(), entries, str::to_string);
            if locals.get(control_id).is_some_and(HashMap::is_empty) {
                locals.remove(control_id);
            }
            changed
        };

        if !changed.is_empty() {
            trace!(control_id = %control_id, changed = changed.len(), "Local variables changed");
            self.clock.emit(ClockEvent::LocalVariablesChanged {
                names: changed.clone(),
                control_id: control_id.clone(),
            });
        }
        changed
    }

    /// Current value of a control's local variable
    pub fn local_value(&self, control_id: &ControlId, name: &str) -> VariableValue {
        lock(&self.local_values)
            .get(control_id)
            .and_then(|ns| ns.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every local variable of a destroyed control
    pub fn forget_local_values(&self, control_id: &ControlId) {
        let names: HashSet<String> = lock(&self.local_values)
            .remove(control_id)
            .map(|ns| ns.into_keys().collect())
            .unwrap_or_default();

        if !names.is_empty() {
            self.clock.emit(ClockEvent::LocalVariablesChanged {
                names,
                control_id: control_id.clone(),
            });
        }
    }

    /// The `this:` pseudo-variables of a control
    pub fn injected_variables(&self, control_id: Option<&ControlId>) -> InjectedVariables {
        let location = control_id.and_then(|id| self.locations.location_of(id));
        let mut vars = HashMap::new();

        let Some(loc) = location else {
            for name in INJECTED_NAMES {
                vars.insert(
                    qualified_key(THIS, name),
                    InjectedValue::Literal(VariableValue::from(UNKNOWN_SENTINEL)),
                );
            }
            return InjectedVariables(vars);
        };

        let literal = |v: VariableValue| InjectedValue::Literal(v);
        vars.insert(
            qualified_key(THIS, "page"),
            literal(VariableValue::Number(f64::from(loc.page_number))),
        );
        vars.insert(
            qualified_key(THIS, "row"),
            literal(VariableValue::Number(f64::from(loc.row))),
        );
        vars.insert(
            qualified_key(THIS, "column"),
            literal(VariableValue::Number(f64::from(loc.column))),
        );
        vars.insert(
            qualified_key(THIS, "location"),
            literal(VariableValue::String(loc.to_string())),
        );
        vars.insert(
            qualified_key(THIS, "page_name"),
            InjectedValue::Reference(qualified_key(
                INTERNAL,
                &format!("page_name_{}", loc.page_number),
            )),
        );
        vars.insert(
            qualified_key(THIS, "step"),
            InjectedValue::Reference(qualified_key(
                INTERNAL,
                &format!("b_step_{}_{}_{}", loc.page_number, loc.row, loc.column),
            )),
        );

        InjectedVariables(vars)
    }

    /// Build the resolution context of a parse/evaluate call
    pub fn parse_context(&self, control_id: Option<&ControlId>) -> ParseContext<'_> {
        ParseContext {
            store: self,
            control_id: control_id.cloned(),
            injected: self.injected_variables(control_id),
        }
    }

    /// Substitute variables into a text on behalf of a control
    pub fn parse_variables(
        &self,
        parser: &dyn ExpressionParser,
        text: &str,
        control_id: Option<&ControlId>,
    ) -> ParseResult {
        parser.parse_variables(text, &self.parse_context(control_id))
    }

    /// Evaluate an expression on behalf of a control
    pub fn execute_expression(
        &self,
        parser: &dyn ExpressionParser,
        text: &str,
        control_id: Option<&ControlId>,
        required_type: Option<ValueType>,
    ) -> ExecuteResult {
        parser.execute_expression(text, &self.parse_context(control_id), required_type)
    }

    fn emit_changed(&self, keys: HashSet<String>, origin: Option<&str>) {
        if keys.is_empty() {
            return;
        }
        self.clock.emit(ClockEvent::VariablesChanged {
            keys,
            origin: origin.map(str::to_string),
        });
    }
}

const INJECTED_NAMES: [&str; 6] = ["page", "row", "column", "location", "page_name", "step"];

/// A `this:` pseudo-variable
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedValue {
    /// Resolves to a fixed value
    Literal(VariableValue),
    /// Resolves through another fully-qualified key, which is also the key a
    /// reader must watch
    Reference(String),
}

/// The injected pseudo-variables of one parse/evaluate call, by qualified key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectedVariables(HashMap<String, InjectedValue>);

impl InjectedVariables {
    pub fn get(&self, key: &str) -> Option<&InjectedValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Variable resolution for one parse/evaluate call
pub struct ParseContext<'a> {
    store: &'a VariableStore,
    control_id: Option<ControlId>,
    injected: InjectedVariables,
}

impl ParseContext<'_> {
    /// Resolve a fully-qualified key
    ///
    /// Injected literals win, injected references resolve through the store,
    /// `local:` keys resolve against the evaluating control.
    pub fn value_of(&self, key: &str) -> VariableValue {
        match self.injected.get(key) {
            Some(InjectedValue::Literal(value)) => return value.clone(),
            Some(InjectedValue::Reference(target)) => return self.store.get_by_key(target),
            None => {}
        }

        match (split_qualified_key(key), &self.control_id) {
            (Some((LOCAL, name)), Some(control_id)) => self.store.local_value(control_id, name),
            _ => self.store.get_by_key(key),
        }
    }

    /// The key whose changes a reader of `key` must watch
    pub fn dependency_of(&self, key: &str) -> String {
        match self.injected.get(key) {
            Some(InjectedValue::Reference(target)) => target.clone(),
            _ => key.to_string(),
        }
    }

    /// The control evaluating the expression, if any
    pub fn control_id(&self) -> Option<&ControlId> {
        self.control_id.as_ref()
    }
}

fn apply_batch<K, N, I>(
    table: &mut Table<K>,
    owner: K,
    entries: I,
    report: impl Fn(&str) -> String,
) -> HashSet<String>
where
    K: std::hash::Hash + Eq,
    N: Into<String>,
    I: IntoIterator<Item = (N, VariableValue)>,
{
    let values = table.entry(owner).or_default();
    let mut changed = HashSet::new();

    for (name, value) in entries {
        let name = name.into();
        let current = values.get(&name).unwrap_or(&VariableValue::Undefined);
        if *current == value {
            continue;
        }

        changed.insert(report(&name));
        if value.is_undefined() {
            values.remove(&name);
        } else {
            values.insert(name, value);
        }
    }

    changed
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
