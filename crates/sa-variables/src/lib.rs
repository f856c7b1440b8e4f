//! Reactive variables for surface automation
//!
//! This crate provides:
//! - [`VariableStore`]: the canonical namespace → name → value table, with
//!   batched change notification through the event clock
//! - [`NameConflictRegistry`]: active/standby ownership of contested names
//! - [`ComputedVariables`]: custom variables produced by expression controls
//! - [`BlinkerScheduler`]: shared on/off duty-cycle pseudo-variables
//! - [`ExpressionParser`]: the evaluation port, with [`TemplateParser`]

mod blink;
mod computed;
mod conflict;
mod parser;
mod store;

pub use blink::{
    BlinkSettings, BlinkerScheduler, DEFAULT_EXPIRY_PERIODS, DEFAULT_SWEEP_INTERVAL,
    MIN_BLINK_INTERVAL_MS,
};
pub use computed::{
    ComputedDeps, ComputedVariables, CustomVariableDefinition, CUSTOM_VARIABLE_PREFIX,
    DEFAULT_CASCADE_MAX_WAIT, DEFAULT_CASCADE_WAIT,
};
pub use conflict::{ConflictStrategy, NameConflictRegistry};
pub use parser::{ExecuteResult, ExpressionError, ExpressionParser, ParseResult, TemplateParser};
pub use store::{InjectedValue, InjectedVariables, ParseContext, VariableStore};
