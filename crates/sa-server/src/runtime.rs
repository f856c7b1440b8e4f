//! Composition root
//!
//! Builds one event clock, one variable store and everything that hangs off
//! them, in dependency order.

use anyhow::Result;
use sa_config::AutomationConfig;
use sa_core::namespaces::CUSTOM;
use sa_core::{ClockEvent, MemoryPersistence, NoLocations, NoRedraw, PersistenceStore};
use sa_event_clock::{EventClock, SharedEventClock};
use sa_triggers::{TriggerDeps, TriggerManager};
use sa_variables::{
    BlinkSettings, BlinkerScheduler, ComputedDeps, ComputedVariables, TemplateParser,
    VariableStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::runner::LoggingActionRunner;

/// The running automation core
pub struct SurfaceAutomation {
    pub clock: SharedEventClock,
    pub store: Arc<VariableStore>,
    pub blinker: Arc<BlinkerScheduler>,
    pub computed: Arc<ComputedVariables>,
    pub triggers: TriggerManager,
    tick_interval: Duration,
}

impl SurfaceAutomation {
    /// Wire every component and restore persisted definitions
    pub fn new(config: &AutomationConfig) -> Result<Self> {
        let clock: SharedEventClock = Arc::new(EventClock::new());
        let persistence: Arc<dyn PersistenceStore> = Arc::new(MemoryPersistence::new());
        let store = Arc::new(VariableStore::new(clock.clone(), Arc::new(NoLocations)));

        let blinker = BlinkerScheduler::new(
            store.clone(),
            BlinkSettings {
                min_interval_ms: config.blink.min_interval_ms,
                sweep_interval: config.blink.sweep_interval(),
                expiry_periods: config.blink.expiry_periods,
            },
        );

        let computed = ComputedVariables::new(ComputedDeps {
            clock: clock.clone(),
            store: store.clone(),
            parser: Arc::new(TemplateParser::new()?),
            persistence: persistence.clone(),
            redraw: Arc::new(NoRedraw),
            cascade_wait: config.variables.cascade_debounce(),
            cascade_max_wait: config.variables.cascade_max(),
        });
        computed.load();

        let deps = TriggerDeps::builder()
            .clock(clock.clone())
            .action_runner(Arc::new(LoggingActionRunner))
            .persistence(persistence)
            .condition_debounce(config.conditions.debounce(), config.conditions.debounce_max())
            .build()?;
        let triggers = TriggerManager::new(deps);
        triggers.load();

        Ok(Self {
            clock,
            store,
            blinker,
            computed,
            triggers,
            tick_interval: config.clock.tick_interval(),
        })
    }

    /// Announce startup and start the heartbeat and the blink sweeper
    pub fn start(&self) {
        self.clock.emit(ClockEvent::Startup);
        self.clock.start(self.tick_interval);
        self.blinker.start_sweeper();
        info!(
            triggers = self.triggers.count(),
            custom_variables = self.store.namespace_values(CUSTOM).len(),
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Surface automation running"
        );
    }

    /// Stop timers and tear down every trigger
    pub fn shutdown(&self) {
        self.clock.stop();
        self.triggers.destroy_all();
        self.computed.destroy();
        self.blinker.shutdown();
        info!("Surface automation stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::VariableValue;
    use sa_triggers::{EventKind, IntervalOptions, TriggerEvent, TriggerModel, TriggerOptions};

    #[tokio::test(start_paused = true)]
    async fn test_runtime_lifecycle() {
        let automation = SurfaceAutomation::new(&AutomationConfig::default()).unwrap();
        let trigger = automation
            .triggers
            .create(TriggerModel {
                options: TriggerOptions {
                    enabled: true,
                    ..TriggerOptions::default()
                },
                events: vec![TriggerEvent::new(EventKind::Interval(IntervalOptions {
                    seconds: 1,
                }))],
                actions: vec![serde_json::json!({"action": "noop"})],
            })
            .unwrap();

        automation.start();
        assert!(automation.clock.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(automation.clock.last_tick() >= 3);
        assert!(trigger.last_executed().is_some());

        let key = automation.blinker.track_dependency(1000.0, 0.5);
        assert_eq!(key, "blink:500_500");
        assert!(matches!(
            automation.store.get_by_key(&key),
            VariableValue::Boolean(_)
        ));
        assert_eq!(automation.blinker.live_timer_count(), 1);

        automation.shutdown();
        assert!(!automation.clock.is_running());
        assert_eq!(automation.triggers.count(), 0);
        assert_eq!(automation.blinker.live_timer_count(), 0);
    }
}
