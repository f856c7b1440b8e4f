//! Trigger engine
//!
//! This crate provides the triggers of the automation core. A trigger fires
//! its actions when one of its events occurs and its condition holds.
//!
//! # Architecture
//!
//! ```text
//! EVENT CLOCK → EVENT ENGINES → DISPATCH (next turn) → CONDITION → ACTION RUNNER
//! ```
//!
//! - **Timer events**: interval, time of day, specific date, sunrise/sunset
//! - **Discrete events**: startup, client connect, presses, lock state,
//!   condition edges, variable changes
//! - **Actions**: opaque lists handed to an external [`ActionRunner`]
//!
//! # Key Types
//!
//! - [`TriggerControl`] - One trigger, disabled or armed
//! - [`TimerEventEngine`] / [`MiscEventEngine`] - Per-trigger event engines
//! - [`TriggerManager`] - Owns all triggers
//! - [`next_sun_event`] - Sunrise/sunset computation

pub mod astro;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod manager;
pub mod misc;
pub mod ports;
pub mod timer;
pub mod trigger;

#[cfg(test)]
mod test_zone;

pub use astro::{next_sun_event, sun_event_for_date, SunEventKind};
pub use dispatch::{ActionDispatcher, ExecutionSource};
pub use error::{ActionError, TriggerError, TriggerResult};
pub use event::{
    DelayOptions, EventKind, IntervalOptions, NoOptions, SpecificDateOptions, SunEventOptions,
    TimeOfDayOptions, TriggerEvent, TriggerModel, TriggerOptions, VariableChangedOptions,
};
pub use manager::TriggerManager;
pub use misc::MiscEventEngine;
pub use ports::{
    ActionRunner, AlwaysTrue, ConditionEvaluator, ConditionFactory, RunContext, TriggerDeps,
    TriggerDepsBuilder, DEFAULT_CONDITION_DEBOUNCE, DEFAULT_CONDITION_DEBOUNCE_MAX,
};
pub use timer::{next_time_of_day, specific_date_instant, TimerEventEngine};
pub use trigger::TriggerControl;
