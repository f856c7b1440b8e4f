//! Trigger definitions
//!
//! A trigger is a list of event descriptors (when to consider firing), a list
//! of opaque actions and a few options. This is also the persisted shape.

use chrono::{NaiveDate, NaiveTime};
use sa_core::EventId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::astro::SunEventKind;

/// One event descriptor of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: EventId,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl TriggerEvent {
    /// Create an enabled event with a fresh id
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::generate(),
            enabled: true,
            kind,
        }
    }

    /// Set a specific id
    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event type and its options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options")]
pub enum EventKind {
    /// Every `seconds` ticks
    #[serde(rename = "interval")]
    Interval(IntervalOptions),

    /// At a wall time on selected weekdays
    #[serde(rename = "timeofday")]
    TimeOfDay(TimeOfDayOptions),

    /// Once, at a local date and time
    #[serde(rename = "specificDate")]
    SpecificDate(SpecificDateOptions),

    /// At sunrise or sunset, with an offset
    #[serde(rename = "sun_event")]
    SunEvent(SunEventOptions),

    #[serde(rename = "startup")]
    Startup(DelayOptions),

    #[serde(rename = "client_connect")]
    ClientConnect(DelayOptions),

    /// Any control pressed
    #[serde(rename = "button_press")]
    ButtonPress(NoOptions),

    /// Any control released
    #[serde(rename = "button_depress")]
    ButtonDepress(NoOptions),

    /// The trigger's condition became true
    #[serde(rename = "condition_true")]
    ConditionTrue(NoOptions),

    /// The trigger's condition became false
    #[serde(rename = "condition_false")]
    ConditionFalse(NoOptions),

    /// A variable changed value
    #[serde(rename = "variable_changed")]
    VariableChanged(VariableChangedOptions),

    #[serde(rename = "computer_locked")]
    ComputerLocked(NoOptions),

    #[serde(rename = "computer_unlocked")]
    ComputerUnlocked(NoOptions),
}

impl EventKind {
    /// Serialized type tag
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Interval(_) => "interval",
            Self::TimeOfDay(_) => "timeofday",
            Self::SpecificDate(_) => "specificDate",
            Self::SunEvent(_) => "sun_event",
            Self::Startup(_) => "startup",
            Self::ClientConnect(_) => "client_connect",
            Self::ButtonPress(_) => "button_press",
            Self::ButtonDepress(_) => "button_depress",
            Self::ConditionTrue(_) => "condition_true",
            Self::ConditionFalse(_) => "condition_false",
            Self::VariableChanged(_) => "variable_changed",
            Self::ComputerLocked(_) => "computer_locked",
            Self::ComputerUnlocked(_) => "computer_unlocked",
        }
    }

    /// Whether the timer engine handles this event
    pub fn is_timer(&self) -> bool {
        matches!(
            self,
            Self::Interval(_) | Self::TimeOfDay(_) | Self::SpecificDate(_) | Self::SunEvent(_)
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoOptions {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalOptions {
    /// Period in ticks (seconds); non-positive never fires
    pub seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayOptions {
    /// Wall time, `HH:MM:SS` or `HH:MM`
    pub time: String,
    /// Allowed weekdays, 0 = Sunday
    #[serde(default = "all_days")]
    pub days: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificDateOptions {
    /// Local date, `YYYY-MM-DD`
    pub date: String,
    /// Wall time, `HH:MM:SS` or `HH:MM`
    pub time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunEventOptions {
    #[serde(rename = "type")]
    pub kind: SunEventKind,
    pub latitude: f64,
    pub longitude: f64,
    /// Minutes relative to the event; may exceed a day
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelayOptions {
    /// Milliseconds between the occurrence and running the actions
    #[serde(default)]
    pub delay: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableChangedOptions {
    /// Fully-qualified `namespace:name` key
    #[serde(rename = "variableId")]
    pub variable_id: String,
}

/// User-facing options of a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOptions {
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default, rename = "sortOrder")]
    pub sort_order: i32,

    #[serde(default, rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            name: "New Trigger".to_string(),
            enabled: false,
            sort_order: 0,
            group_id: None,
        }
    }
}

/// Everything that defines a trigger, as persisted
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerModel {
    pub options: TriggerOptions,

    #[serde(default)]
    pub events: Vec<TriggerEvent>,

    /// Opaque action list handed to the action runner
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

impl TriggerModel {
    /// Check event ids are unique
    pub fn has_unique_event_ids(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.events.iter().all(|e| seen.insert(&e.id))
    }
}

/// Parse a `HH:MM:SS` or `HH:MM` wall time
pub fn parse_wall_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn default_true() -> bool {
    true
}

fn all_days() -> Vec<u32> {
    (0..7).collect()
}
