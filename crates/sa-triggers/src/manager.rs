//! Trigger collection
//!
//! Owns every trigger of the application, keyed by control id, and restores
//! them from persistence at startup.

use chrono::Utc;
use dashmap::DashMap;
use sa_core::{ControlId, TRIGGER_PREFIX};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dispatch::ExecutionSource;
use crate::error::{TriggerError, TriggerResult};
use crate::event::TriggerModel;
use crate::ports::TriggerDeps;
use crate::trigger::TriggerControl;

/// All triggers, keyed by control id
pub struct TriggerManager {
    deps: TriggerDeps,
    triggers: DashMap<ControlId, Arc<TriggerControl>>,
}

impl TriggerManager {
    pub fn new(deps: TriggerDeps) -> Self {
        Self {
            deps,
            triggers: DashMap::new(),
        }
    }

    /// Create and persist a new trigger
    pub fn create(&self, model: TriggerModel) -> TriggerResult<Arc<TriggerControl>> {
        if !model.has_unique_event_ids() {
            return Err(TriggerError::InvalidDefinition(
                "event ids must be unique within a trigger".to_string(),
            ));
        }

        let id = ControlId::generate_trigger();
        let trigger = TriggerControl::new(id.clone(), model, self.deps.clone());
        if let Err(e) = trigger.persist() {
            trigger.destroy();
            return Err(e);
        }

        info!(trigger_id = %id, name = %trigger.options().name, "Created trigger");
        self.triggers.insert(id, trigger.clone());
        Ok(trigger)
    }

    /// Restore every persisted trigger not already present
    ///
    /// Triggers are built in sort order, then id order, so startup and
    /// client-connect events of equal delay dispatch in a stable order.
    pub fn load(&self) -> usize {
        let mut models: Vec<(ControlId, TriggerModel)> = Vec::new();
        for key in self.deps.persistence.keys_with_prefix(TRIGGER_PREFIX) {
            let id = ControlId::new(key.as_str());
            if self.triggers.contains_key(&id) {
                continue;
            }
            let Some(raw) = self.deps.persistence.get(&key) else {
                continue;
            };
            match serde_json::from_value::<TriggerModel>(raw) {
                Ok(model) => models.push((id, model)),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed trigger"),
            }
        }

        models.sort_by(|a, b| {
            a.1.options
                .sort_order
                .cmp(&b.1.options.sort_order)
                .then_with(|| a.0.cmp(&b.0))
        });

        let count = models.len();
        for (id, model) in models {
            let trigger = TriggerControl::new(id.clone(), model, self.deps.clone());
            self.triggers.insert(id, trigger);
        }
        info!(count, "Loaded triggers");
        count
    }

    /// Destroy a trigger and delete its persisted definition
    pub fn remove(&self, id: &ControlId) -> TriggerResult<()> {
        let (_, trigger) = self
            .triggers
            .remove(id)
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))?;
        trigger.destroy();
        self.deps.persistence.delete(id.as_str())?;
        info!(trigger_id = %id, "Removed trigger");
        Ok(())
    }

    pub fn get(&self, id: &ControlId) -> Option<Arc<TriggerControl>> {
        self.triggers.get(id).map(|t| t.value().clone())
    }

    /// Every trigger, by sort order then id
    pub fn all(&self) -> Vec<Arc<TriggerControl>> {
        let mut triggers: Vec<(i32, Arc<TriggerControl>)> = self
            .triggers
            .iter()
            .map(|t| (t.options().sort_order, t.value().clone()))
            .collect();
        triggers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));
        triggers.into_iter().map(|(_, t)| t).collect()
    }

    pub fn enable(&self, id: &ControlId) -> TriggerResult<()> {
        self.require(id)?.set_enabled(true, Utc::now());
        Ok(())
    }

    pub fn disable(&self, id: &ControlId) -> TriggerResult<()> {
        self.require(id)?.set_enabled(false, Utc::now());
        Ok(())
    }

    /// Flip the enabled state, returning the new one
    pub fn toggle(&self, id: &ControlId) -> TriggerResult<bool> {
        let trigger = self.require(id)?;
        let enabled = !trigger.is_enabled();
        trigger.set_enabled(enabled, Utc::now());
        Ok(enabled)
    }

    /// Run a trigger's actions now, ignoring its enabled state and condition
    pub fn run_now(&self, id: &ControlId) -> TriggerResult<bool> {
        Ok(self
            .require(id)?
            .execute_actions(Utc::now(), ExecutionSource::Test))
    }

    pub fn count(&self) -> usize {
        self.triggers.len()
    }

    /// Destroy every trigger, keeping the persisted definitions
    pub fn destroy_all(&self) {
        let ids: Vec<ControlId> = self.triggers.iter().map(|t| t.key().clone()).collect();
        for id in ids {
            if let Some((_, trigger)) = self.triggers.remove(&id) {
                trigger.destroy();
            }
        }
    }

    fn require(&self, id: &ControlId) -> TriggerResult<Arc<TriggerControl>> {
        self.get(id)
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))
    }
}
