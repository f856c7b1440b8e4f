//! Deferred action dispatch
//!
//! Engines never run actions from inside event delivery. They hand the
//! occurrence to an [`ActionDispatcher`], which calls the owner back on a
//! later turn of the runtime, after checking the owner is still alive.

use chrono::{DateTime, Utc};
use sa_core::ControlId;
use sa_event_clock::{panic_message, Liveness};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, trace, warn};

/// Why a trigger's actions are being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionSource {
    /// Interval, time of day, specific date or sun event
    Timer,
    Startup,
    ClientConnect,
    ButtonPress,
    ButtonDepress,
    ComputerLocked,
    ComputerUnlocked,
    VariableChanged,
    /// A condition edge; the condition check is skipped
    ConditionChanged,
    /// Manual run; enabled and condition checks are skipped
    Test,
}

impl fmt::Display for ExecutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timer => "timer",
            Self::Startup => "startup",
            Self::ClientConnect => "client_connect",
            Self::ButtonPress => "button_press",
            Self::ButtonDepress => "button_depress",
            Self::ComputerLocked => "computer_locked",
            Self::ComputerUnlocked => "computer_unlocked",
            Self::VariableChanged => "variable_changed",
            Self::ConditionChanged => "condition_changed",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

/// Callback invoked for each dispatched occurrence
pub type ActionCallback = Arc<dyn Fn(DateTime<Utc>, ExecutionSource) + Send + Sync>;

/// Schedules a trigger's action callback on a later turn
#[derive(Clone)]
pub struct ActionDispatcher {
    trigger_id: ControlId,
    liveness: Liveness,
    callback: ActionCallback,
}

impl ActionDispatcher {
    pub fn new(trigger_id: ControlId, liveness: Liveness, callback: ActionCallback) -> Self {
        Self {
            trigger_id,
            liveness,
            callback,
        }
    }

    /// Run the callback on the next turn, stamped with the occurrence instant
    pub fn dispatch(&self, at: DateTime<Utc>, source: ExecutionSource) {
        self.schedule(Duration::ZERO, Some(at), source);
    }

    /// Run the callback after `delay`, stamped with the instant it runs
    ///
    /// Each call schedules its own run; calls are never coalesced.
    pub fn dispatch_after(&self, delay: Duration, source: ExecutionSource) {
        self.schedule(delay, None, source);
    }

    fn schedule(&self, delay: Duration, at: Option<DateTime<Utc>>, source: ExecutionSource) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                trigger_id = %self.trigger_id,
                source = %source,
                "No async runtime, dropping action dispatch"
            );
            return;
        };

        let dispatcher = self.clone();
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            dispatcher.run(at.unwrap_or_else(Utc::now), source);
        });
    }

    fn run(&self, at: DateTime<Utc>, source: ExecutionSource) {
        if !self.liveness.is_alive() {
            trace!(trigger_id = %self.trigger_id, source = %source, "Trigger gone, skipping dispatch");
            return;
        }

        let callback = &self.callback;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(at, source))) {
            error!(
                trigger_id = %self.trigger_id,
                source = %source,
                error = panic_message(panic.as_ref()),
                "Trigger action callback panicked"
            );
        }
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("trigger_id", &self.trigger_id)
            .field("alive", &self.liveness.is_alive())
            .finish()
    }
}
