//! Trigger error types

use sa_core::PersistenceError;
use thiserror::Error;

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Trigger not found: {0}")]
    NotFound(String),

    #[error("Invalid trigger definition: {0}")]
    InvalidDefinition(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Errors reported by an action runner
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Action run aborted")]
    Aborted,
}
