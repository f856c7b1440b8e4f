//! Blink pseudo-variables
//!
//! A blink variable toggles between `true` and `false` on an on/off duty
//! cycle. All callers asking for the same (on, off) pair share one record and
//! one timer. Records nobody has probed for a while are swept away.

use sa_core::namespaces::BLINK;
use sa_core::{qualified_key, VariableValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::store::VariableStore;

/// Shortest accepted blink interval
pub const MIN_BLINK_INTERVAL_MS: u64 = 50;

/// How often unused records are swept
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Number of own periods a record survives without being probed
pub const DEFAULT_EXPIRY_PERIODS: u32 = 10;

#[derive(Debug)]
struct BlinkingInterval {
    on_ms: u64,
    off_ms: u64,
    last_probed: Instant,
    value: bool,
    timer: Option<JoinHandle<()>>,
}

impl BlinkingInterval {
    fn period(&self) -> Duration {
        Duration::from_millis(self.on_ms + self.off_ms)
    }
}

/// Blink scheduler settings
#[derive(Debug, Clone, Copy)]
pub struct BlinkSettings {
    pub min_interval_ms: u64,
    pub sweep_interval: Duration,
    pub expiry_periods: u32,
}

impl Default for BlinkSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: MIN_BLINK_INTERVAL_MS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            expiry_periods: DEFAULT_EXPIRY_PERIODS,
        }
    }
}

/// Produces the `blink:{on}_{off}` variables
pub struct BlinkerScheduler {
    store: Arc<VariableStore>,
    settings: BlinkSettings,
    intervals: Mutex<HashMap<(u64, u64), BlinkingInterval>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BlinkerScheduler {
    pub fn new(store: Arc<VariableStore>, settings: BlinkSettings) -> Arc<Self> {
        Arc::new(Self {
            store,
            settings,
            intervals: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        })
    }

    /// Get the blink variable for an interval and duty cycle
    ///
    /// Returns the fully-qualified key of the variable. The interval is
    /// clamped to the configured floor and the duty cycle to `[0, 1]`; the
    /// record is keyed by the resulting (on, off) pair.
    pub fn track_dependency(self: &Arc<Self>, interval_ms: f64, duty_cycle: f64) -> String {
        let (on_ms, off_ms) = self.periods(interval_ms, duty_cycle);
        let name = format!("{on_ms}_{off_ms}");
        let key = qualified_key(BLINK, &name);

        let initial = {
            let mut intervals = self.lock();
            if let Some(record) = intervals.get_mut(&(on_ms, off_ms)) {
                record.last_probed = Instant::now();
                return key;
            }

            let (value, first_toggle) = initial_phase(on_ms, off_ms);
            let timer = first_toggle.and_then(|delay| self.spawn_timer(on_ms, off_ms, delay));
            debug!(on_ms, off_ms, timer = timer.is_some(), "Created blink interval");

            intervals.insert(
                (on_ms, off_ms),
                BlinkingInterval {
                    on_ms,
                    off_ms,
                    last_probed: Instant::now(),
                    value,
                    timer,
                },
            );
            value
        };

        self.store
            .set_values(BLINK, [(name, VariableValue::Boolean(initial))]);
        key
    }

    /// Drop every record not probed within its expiry window
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expiry = self.settings.expiry_periods;

        let expired: Vec<String> = {
            let mut intervals = self.lock();
            let stale: Vec<(u64, u64)> = intervals
                .iter()
                .filter(|(_, r)| now.duration_since(r.last_probed) > r.period() * expiry)
                .map(|(pair, _)| *pair)
                .collect();

            stale
                .into_iter()
                .filter_map(|pair| intervals.remove(&pair))
                .map(|record| {
                    if let Some(timer) = record.timer {
                        timer.abort();
                    }
                    format!("{}_{}", record.on_ms, record.off_ms)
                })
                .collect()
        };

        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept unused blink intervals");
            self.store.set_values(
                BLINK,
                expired.iter().map(|n| (n.as_str(), VariableValue::Undefined)),
            );
        }
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) periodically
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }

        let period = self.settings.sweep_interval;
        info!(period_secs = period.as_secs(), "Starting blink sweeper");
        let scheduler = Arc::downgrade(self);
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                scheduler.sweep();
            }
        }));
    }

    /// Number of blink records driven by a live timer
    pub fn live_timer_count(&self) -> usize {
        self.lock().values().filter(|r| r.timer.is_some()).count()
    }

    /// Number of blink records, including constant ones
    pub fn interval_count(&self) -> usize {
        self.lock().len()
    }

    /// Stop every timer and the sweeper
    pub fn shutdown(&self) {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        for (_, record) in self.lock().drain() {
            if let Some(timer) = record.timer {
                timer.abort();
            }
        }
    }

    fn periods(&self, interval_ms: f64, duty_cycle: f64) -> (u64, u64) {
        let floor = self.settings.min_interval_ms as f64;
        let interval = if interval_ms.is_finite() {
            interval_ms.max(floor)
        } else {
            floor
        };
        let duty = if duty_cycle.is_finite() {
            duty_cycle.clamp(0.0, 1.0)
        } else {
            0.5
        };

        let on = (interval * duty).ceil() as u64;
        let off = (interval * (1.0 - duty)).floor() as u64;
        (on, off)
    }

    fn spawn_timer(
        self: &Arc<Self>,
        on_ms: u64,
        off_ms: u64,
        first_toggle: Duration,
    ) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!(on_ms, off_ms, "No async runtime, blink variable will not toggle");
            return None;
        };

        let scheduler: Weak<Self> = Arc::downgrade(self);
        let mut deadline = Instant::now() + first_toggle;
        Some(handle.spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                let Some(on) = scheduler.toggle(on_ms, off_ms) else {
                    break;
                };
                deadline += Duration::from_millis(if on { on_ms } else { off_ms });
            }
        }))
    }

    fn toggle(&self, on_ms: u64, off_ms: u64) -> Option<bool> {
        let value = {
            let mut intervals = self.lock();
            let record = intervals.get_mut(&(on_ms, off_ms))?;
            record.value = !record.value;
            record.value
        };

        trace!(on_ms, off_ms, value, "Blink toggle");
        self.store.set_values(
            BLINK,
            [(format!("{on_ms}_{off_ms}"), VariableValue::Boolean(value))],
        );
        Some(value)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(u64, u64), BlinkingInterval>> {
        self.intervals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current value and time to the next toggle, aligned to the Unix epoch
///
/// A zero-length half means a constant value with no toggles.
fn initial_phase(on_ms: u64, off_ms: u64) -> (bool, Option<Duration>) {
    if on_ms == 0 {
        return (false, None);
    }
    if off_ms == 0 {
        return (true, None);
    }

    let period = on_ms + off_ms;
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let position = epoch_ms % period;

    if position < on_ms {
        (true, Some(Duration::from_millis(on_ms - position)))
    } else {
        (false, Some(Duration::from_millis(period - position)))
    }
}
