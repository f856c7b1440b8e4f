//! Owner liveness tokens
//!
//! Deferred work (delayed actions, debounced rechecks, blink toggles) captures
//! a clone of its owner's token and checks it before running. Cancelling the
//! token when the owner is destroyed turns every pending callback into a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag telling deferred work whether its owner still exists
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Create a live token
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Mark the owner as destroyed; idempotent
    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check if the owner has not been destroyed yet
    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
