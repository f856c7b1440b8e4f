//! Timer-driven trigger events
//!
//! The TimerEventEngine keeps one collection per kind of scheduled event and
//! evaluates all of them on every clock tick. However many events qualify in
//! one tick, the trigger's actions are dispatched at most once.
//!
//! - Interval: qualifies when `last_execute + period <= tick`, then
//!   `last_execute = tick`. Missed ticks never cause a burst of catch-up runs.
//! - Time of day: next instant at a wall time on an allowed weekday,
//!   recomputed only after it fired.
//! - Sun event: next sunrise/sunset plus offset, recomputed per occurrence.
//! - Specific date: one instant; fires once.
//!
//! Malformed options simply mean "no next occurrence".

use chrono::{DateTime, Datelike, Utc};
use sa_core::{ControlId, EventId, ZoneRules};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::astro::next_sun_event;
use crate::dispatch::{ActionDispatcher, ExecutionSource};
use crate::event::{
    parse_date, parse_wall_time, EventKind, SpecificDateOptions, SunEventOptions,
    TimeOfDayOptions, TriggerEvent,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct IntervalEvent {
    /// Period in ticks, `None` when not positive
    period: Option<u64>,
    last_execute: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct ScheduledEvent<O> {
    options: O,
    next: Option<DateTime<Utc>>,
}

/// Scheduled events of one trigger
pub struct TimerEventEngine {
    trigger_id: ControlId,
    zone: Arc<dyn ZoneRules>,
    dispatcher: ActionDispatcher,
    enabled: bool,
    last_tick: u64,
    intervals: BTreeMap<EventId, IntervalEvent>,
    time_of_day: BTreeMap<EventId, ScheduledEvent<TimeOfDayOptions>>,
    specific_dates: BTreeMap<EventId, ScheduledEvent<SpecificDateOptions>>,
    sun_events: BTreeMap<EventId, ScheduledEvent<SunEventOptions>>,
}

impl TimerEventEngine {
    /// Create a disarmed engine
    pub fn new(
        trigger_id: ControlId,
        zone: Arc<dyn ZoneRules>,
        dispatcher: ActionDispatcher,
        last_tick: u64,
    ) -> Self {
        Self {
            trigger_id,
            zone,
            dispatcher,
            enabled: false,
            last_tick,
            intervals: BTreeMap::new(),
            time_of_day: BTreeMap::new(),
            specific_dates: BTreeMap::new(),
            sun_events: BTreeMap::new(),
        }
    }

    /// Arm or disarm
    ///
    /// Arming resets every interval baseline to the next tick, so the first
    /// interval run is one full period away, and recomputes every scheduled
    /// instant from `now`.
    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;

        if enabled {
            let baseline = self.last_tick + 1;
            for interval in self.intervals.values_mut() {
                interval.last_execute = baseline;
            }
            self.recompute_all(now);
        }
        debug!(trigger_id = %self.trigger_id, enabled, "Timer events armed state changed");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start tracking an event; non-timer and disabled events are ignored
    pub fn add_event(&mut self, event: &TriggerEvent, now: DateTime<Utc>) {
        if !event.enabled {
            return;
        }

        let id = event.id.clone();
        match &event.kind {
            EventKind::Interval(options) => {
                let period = u64::try_from(options.seconds).ok().filter(|p| *p > 0);
                self.intervals.insert(
                    id,
                    IntervalEvent {
                        period,
                        last_execute: self.last_tick + 1,
                    },
                );
            }
            EventKind::TimeOfDay(options) => {
                let next = next_time_of_day(self.zone.as_ref(), options, now);
                self.time_of_day.insert(
                    id,
                    ScheduledEvent {
                        options: options.clone(),
                        next,
                    },
                );
            }
            EventKind::SpecificDate(options) => {
                let next = specific_date_instant(self.zone.as_ref(), options, now);
                self.specific_dates.insert(
                    id,
                    ScheduledEvent {
                        options: options.clone(),
                        next,
                    },
                );
            }
            EventKind::SunEvent(options) => {
                let next = next_sun(self.zone.as_ref(), options, now);
                self.sun_events.insert(
                    id,
                    ScheduledEvent {
                        options: *options,
                        next,
                    },
                );
            }
            _ => {}
        }
    }

    /// Stop tracking an event
    pub fn remove_event(&mut self, id: &EventId) {
        self.intervals.remove(id);
        self.time_of_day.remove(id);
        self.specific_dates.remove(id);
        self.sun_events.remove(id);
    }

    /// Re-read an event's configuration
    pub fn replace_event(&mut self, event: &TriggerEvent, now: DateTime<Utc>) {
        self.remove_event(&event.id);
        self.add_event(event, now);
    }

    /// Evaluate every event against a tick
    ///
    /// Returns whether the actions were dispatched.
    pub fn on_tick(&mut self, tick: u64, now: DateTime<Utc>) -> bool {
        self.last_tick = tick;
        if !self.enabled {
            return false;
        }

        let mut fired: HashSet<&'static str> = HashSet::new();

        for interval in self.intervals.values_mut() {
            if let Some(period) = interval.period {
                if interval.last_execute + period <= tick {
                    interval.last_execute = tick;
                    fired.insert("interval");
                }
            }
        }

        let zone = self.zone.as_ref();
        for event in self.time_of_day.values_mut() {
            if event.next.is_some_and(|next| next <= now) {
                event.next = next_time_of_day(zone, &event.options, now);
                fired.insert("timeofday");
            }
        }

        for event in self.specific_dates.values_mut() {
            if event.next.is_some_and(|next| next <= now) {
                event.next = None;
                fired.insert("specificDate");
            }
        }

        for event in self.sun_events.values_mut() {
            if event.next.is_some_and(|next| next <= now) {
                event.next = next_sun(zone, &event.options, now);
                fired.insert("sun_event");
            }
        }

        if fired.is_empty() {
            return false;
        }

        trace!(trigger_id = %self.trigger_id, tick, kinds = ?fired, "Timer events qualified");
        self.dispatcher.dispatch(now, ExecutionSource::Timer);
        true
    }

    /// Next scheduled instant of an event, if it has one
    pub fn next_instant(&self, id: &EventId) -> Option<DateTime<Utc>> {
        self.time_of_day
            .get(id)
            .and_then(|e| e.next)
            .or_else(|| self.specific_dates.get(id).and_then(|e| e.next))
            .or_else(|| self.sun_events.get(id).and_then(|e| e.next))
    }

    /// Number of tracked events
    pub fn event_count(&self) -> usize {
        self.intervals.len()
            + self.time_of_day.len()
            + self.specific_dates.len()
            + self.sun_events.len()
    }

    fn recompute_all(&mut self, now: DateTime<Utc>) {
        let zone = self.zone.as_ref();
        for event in self.time_of_day.values_mut() {
            event.next = next_time_of_day(zone, &event.options, now);
        }
        for event in self.specific_dates.values_mut() {
            event.next = specific_date_instant(zone, &event.options, now);
        }
        for event in self.sun_events.values_mut() {
            event.next = next_sun(zone, &event.options, now);
        }
    }
}

impl fmt::Debug for TimerEventEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEventEngine")
            .field("trigger_id", &self.trigger_id)
            .field("enabled", &self.enabled)
            .field("last_tick", &self.last_tick)
            .field("events", &self.event_count())
            .finish()
    }
}

/// Next instant strictly after `now` at the wall time on an allowed weekday
///
/// Weekdays count from 0 = Sunday. A malformed time or an empty (or entirely
/// out of range) weekday set never fires.
pub fn next_time_of_day(
    zone: &dyn ZoneRules,
    options: &TimeOfDayOptions,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let time = parse_wall_time(&options.time)?;
    let days: HashSet<u32> = options.days.iter().copied().filter(|d| *d < 7).collect();
    if days.is_empty() {
        return None;
    }

    let today = zone.local_date(now);
    let mut date = today;
    if zone.resolve_local(today.and_time(time))? <= now {
        date = today.succ_opt()?;
    }

    for _ in 0..7 {
        if days.contains(&date.weekday().num_days_from_sunday()) {
            let instant = zone.resolve_local(date.and_time(time))?;
            if instant > now {
                return Some(instant);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Instant of a specific date, `None` once it is in the past
pub fn specific_date_instant(
    zone: &dyn ZoneRules,
    options: &SpecificDateOptions,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let date = parse_date(&options.date)?;
    let time = parse_wall_time(&options.time)?;
    zone.resolve_local(date.and_time(time))
        .filter(|instant| *instant > now)
}

fn next_sun(
    zone: &dyn ZoneRules,
    options: &SunEventOptions,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_sun_event(
        zone,
        options.latitude,
        options.longitude,
        options.offset,
        options.kind,
        now,
    )
}

/// Instant of a tick's wall clock timestamp
pub(crate) fn instant_from_millis(wall_clock_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(wall_clock_ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
