//! Persistence port
//!
//! The automation core stores trigger definitions and custom-variable
//! definitions through opaque keyed calls. How (and in which format) the
//! values end up on disk is up to the implementor.

use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persistence backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Keyed get/set/delete against an external store
pub trait PersistenceStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError>;

    /// Delete a key; deleting an absent key is not an error
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// In-memory persistence, used by the daemon and by tests
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    values: DashMap<String, serde_json::Value>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PersistenceStore for MemoryPersistence {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        trace!(key, "Persisting value");
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        trace!(key, "Deleting persisted value");
        self.values.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }
}
