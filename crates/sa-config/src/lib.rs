//! Configuration for surface automation
//!
//! The daemon reads `surface-automation.yaml`. Every field has a default, so a
//! missing file or a partial one is fine. A few environment variables
//! override the file:
//!
//! - `SA_LOG` / `RUST_LOG` - log filter
//! - `SA_TICK_INTERVAL_MS` - heartbeat period
//!
//! # Example
//!
//! ```ignore
//! use sa_config::load_config;
//!
//! let config = load_config("surface-automation.yaml")?;
//! let period = config.clock.tick_interval();
//! ```

mod config;
mod error;
mod loader;

pub use config::{
    AutomationConfig, BlinkConfig, ClockConfig, ConditionConfig, LoggingConfig, VariablesConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, DEFAULT_CONFIG_FILE};
