//! Action runner used by the daemon
//!
//! Executing actions belongs to the host application. The standalone daemon
//! only records what would run.

use async_trait::async_trait;
use sa_triggers::{ActionError, ActionRunner, RunContext};
use tracing::info;

/// Logs every action it is handed
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActionRunner;

#[async_trait]
impl ActionRunner for LoggingActionRunner {
    async fn run_actions(
        &self,
        actions: &[serde_json::Value],
        context: RunContext,
    ) -> Result<(), ActionError> {
        let location = context.location.map(|l| l.to_string());
        for (index, action) in actions.iter().enumerate() {
            info!(
                surface_id = %context.surface_id,
                location = location.as_deref().unwrap_or("-"),
                index,
                action = %action,
                "Running action"
            );
        }
        Ok(())
    }
}
