//! Core types for surface automation
//!
//! This crate provides the fundamental types shared by the automation core:
//! variable values and their fully-qualified keys, control/surface/event ids,
//! control locations, the clock event variants, wall-clock zone rules and the
//! persistence and redraw ports.

mod event;
mod ids;
mod location;
mod persistence;
mod redraw;
mod value;
mod zone;

pub use event::{ClockEvent, ClockEventKind};
pub use ids::{ControlId, EventId, SurfaceId, TRIGGER_PREFIX};
pub use location::{ControlLocation, NoLocations, PageLocationLookup};
pub use persistence::{MemoryPersistence, PersistenceError, PersistenceStore};
pub use redraw::{NoRedraw, RedrawNotifier};
pub use value::{qualified_key, split_qualified_key, ValueType, VariableValue};
pub use zone::ZoneRules;

/// Sentinel value injected for location variables when a control has no location
pub const UNKNOWN_SENTINEL: &str = "$NA";

/// Well-known variable namespaces
pub mod namespaces {
    /// Values computed by expression-variable controls
    pub const CUSTOM: &str = "custom";

    /// Application-owned values (page names, step counters, ...)
    pub const INTERNAL: &str = "internal";

    /// Blink pseudo-variables produced by the blinker scheduler
    pub const BLINK: &str = "blink";

    /// Per-control local values, resolved against the evaluating control
    pub const LOCAL: &str = "local";

    /// Location pseudo-variables injected for every parse/evaluate call
    pub const THIS: &str = "this";
}
