//! Collaborators a trigger depends on
//!
//! Running actions and evaluating conditions belong to the surrounding
//! application. Triggers only see these traits.

use async_trait::async_trait;
use sa_core::{
    ControlId, ControlLocation, NoLocations, NoRedraw, PageLocationLookup, PersistenceStore,
    RedrawNotifier, SurfaceId, ZoneRules,
};
use sa_event_clock::SharedEventClock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ActionError, TriggerError, TriggerResult};

/// Default window of the condition recheck debounce
pub const DEFAULT_CONDITION_DEBOUNCE: Duration = Duration::from_millis(10);

/// Default cap of the condition recheck debounce
pub const DEFAULT_CONDITION_DEBOUNCE_MAX: Duration = Duration::from_millis(20);

/// Where an action run comes from
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// The trigger's own surface id
    pub surface_id: SurfaceId,
    pub location: Option<ControlLocation>,
}

/// Runs a trigger's action list
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run_actions(
        &self,
        actions: &[serde_json::Value],
        context: RunContext,
    ) -> Result<(), ActionError>;
}

/// A trigger's condition
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the condition now
    fn check_condition_value(&self) -> bool;

    /// Fully-qualified variable keys the condition reads
    ///
    /// A change to any of them schedules a debounced recheck.
    fn referenced_variables(&self) -> HashSet<String> {
        HashSet::new()
    }
}

/// Builds the condition of a trigger
pub trait ConditionFactory: Send + Sync {
    fn create(&self, trigger_id: &ControlId) -> Arc<dyn ConditionEvaluator>;
}

/// A condition that always holds
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTrue;

impl ConditionEvaluator for AlwaysTrue {
    fn check_condition_value(&self) -> bool {
        true
    }
}

impl ConditionFactory for AlwaysTrue {
    fn create(&self, _trigger_id: &ControlId) -> Arc<dyn ConditionEvaluator> {
        Arc::new(AlwaysTrue)
    }
}

/// Everything a trigger needs from the rest of the application
#[derive(Clone)]
pub struct TriggerDeps {
    pub clock: SharedEventClock,
    pub action_runner: Arc<dyn ActionRunner>,
    pub condition_factory: Arc<dyn ConditionFactory>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub redraw: Arc<dyn RedrawNotifier>,
    pub locations: Arc<dyn PageLocationLookup>,
    pub zone: Arc<dyn ZoneRules>,
    pub condition_debounce: Duration,
    pub condition_debounce_max: Duration,
}

impl TriggerDeps {
    pub fn builder() -> TriggerDepsBuilder {
        TriggerDepsBuilder::default()
    }
}

/// Builder for [`TriggerDeps`]
///
/// The clock, the action runner and the persistence store are required.
/// Conditions default to [`AlwaysTrue`], the zone to the host's local zone.
#[derive(Default)]
pub struct TriggerDepsBuilder {
    clock: Option<SharedEventClock>,
    action_runner: Option<Arc<dyn ActionRunner>>,
    condition_factory: Option<Arc<dyn ConditionFactory>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    redraw: Option<Arc<dyn RedrawNotifier>>,
    locations: Option<Arc<dyn PageLocationLookup>>,
    zone: Option<Arc<dyn ZoneRules>>,
    condition_debounce: Option<(Duration, Duration)>,
}

impl TriggerDepsBuilder {
    pub fn clock(mut self, clock: SharedEventClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn action_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.action_runner = Some(runner);
        self
    }

    pub fn condition_factory(mut self, factory: Arc<dyn ConditionFactory>) -> Self {
        self.condition_factory = Some(factory);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn redraw(mut self, redraw: Arc<dyn RedrawNotifier>) -> Self {
        self.redraw = Some(redraw);
        self
    }

    pub fn locations(mut self, locations: Arc<dyn PageLocationLookup>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn zone(mut self, zone: Arc<dyn ZoneRules>) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Condition recheck window and cap
    pub fn condition_debounce(mut self, wait: Duration, max_wait: Duration) -> Self {
        self.condition_debounce = Some((wait, max_wait));
        self
    }

    pub fn build(self) -> TriggerResult<TriggerDeps> {
        let (condition_debounce, condition_debounce_max) = self
            .condition_debounce
            .unwrap_or((DEFAULT_CONDITION_DEBOUNCE, DEFAULT_CONDITION_DEBOUNCE_MAX));

        Ok(TriggerDeps {
            clock: self
                .clock
                .ok_or(TriggerError::MissingCollaborator("clock"))?,
            action_runner: self
                .action_runner
                .ok_or(TriggerError::MissingCollaborator("action_runner"))?,
            persistence: self
                .persistence
                .ok_or(TriggerError::MissingCollaborator("persistence"))?,
            condition_factory: self
                .condition_factory
                .unwrap_or_else(|| Arc::new(AlwaysTrue)),
            redraw: self.redraw.unwrap_or_else(|| Arc::new(NoRedraw)),
            locations: self.locations.unwrap_or_else(|| Arc::new(NoLocations)),
            zone: self.zone.unwrap_or_else(|| Arc::new(chrono::Local)),
            condition_debounce,
            condition_debounce_max,
        })
    }
}
