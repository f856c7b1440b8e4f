//! Trailing-edge debouncer with a maximum wait
//!
//! Requests arriving within `wait` of each other are coalesced into one run.
//! A continuous stream of requests still runs the action at least once every
//! `max_wait`, measured from the first request of the burst.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{error, trace, warn};

use crate::{panic_message, Liveness};

type Action = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct DebounceState {
    /// Instant of the first request of the pending burst
    first_request: Option<Instant>,
    /// When the pending run is due
    deadline: Option<Instant>,
    /// A worker task is sleeping towards `deadline`
    worker: bool,
}

/// Debounced action runner
///
/// Explicit state rather than a timer per request: one worker task sleeps
/// until the deadline and re-arms itself whenever a later request pushed the
/// deadline further out.
#[derive(Clone)]
pub struct Debouncer {
    wait: Duration,
    max_wait: Duration,
    state: Arc<Mutex<DebounceState>>,
    action: Action,
    liveness: Liveness,
}

impl Debouncer {
    /// Create a debouncer; the action is skipped once `liveness` is cancelled
    pub fn new(
        wait: Duration,
        max_wait: Duration,
        liveness: Liveness,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            wait,
            max_wait: max_wait.max(wait),
            state: Arc::new(Mutex::new(DebounceState::default())),
            action: Arc::new(action),
            liveness,
        }
    }

    /// Request a run
    pub fn request(&self) {
        if !self.liveness.is_alive() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime, dropping debounced request");
            return;
        };

        let spawn_worker = {
            let mut state = self.lock_state();
            let now = Instant::now();
            let first = *state.first_request.get_or_insert(now);
            state.deadline = Some((now + self.wait).min(first + self.max_wait));
            !std::mem::replace(&mut state.worker, true)
        };

        if spawn_worker {
            let this = self.clone();
            handle.spawn(async move { this.worker().await });
        }
    }

    /// Drop a pending run, if any
    pub fn cancel(&self) {
        let mut state = self.lock_state();
        state.first_request = None;
        state.deadline = None;
    }

    /// Check if a run is pending
    pub fn is_pending(&self) -> bool {
        self.lock_state().deadline.is_some()
    }

    async fn worker(self) {
        loop {
            let deadline = {
                let mut state = self.lock_state();
                match state.deadline {
                    Some(deadline) => deadline,
                    None => {
                        state.worker = false;
                        return;
                    }
                }
            };

            tokio::time::sleep_until(deadline).await;

            let due = {
                let mut state = self.lock_state();
                if state.deadline == Some(deadline) {
                    state.first_request = None;
                    state.deadline = None;
                    state.worker = false;
                    true
                } else {
                    false
                }
            };

            if due {
                trace!("Debounce deadline reached");
                if self.liveness.is_alive() {
                    self.run_action();
                }
                return;
            }
        }
    }

    fn run_action(&self) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            error!(error = panic_message(panic.as_ref()), "Debounced action panicked");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("wait", &self.wait)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}
