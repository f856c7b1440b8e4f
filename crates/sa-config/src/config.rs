//! Configuration sections
//!
//! Each section maps to one subsystem of the automation core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub clock: ClockConfig,
    pub conditions: ConditionConfig,
    pub variables: VariablesConfig,
    pub blink: BlinkConfig,
    pub logging: LoggingConfig,
}

/// Heartbeat of the event clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Period between heartbeat fires in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

impl ClockConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Trigger condition recheck debounce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    pub debounce_ms: u64,
    pub debounce_max_ms: u64,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 10,
            debounce_max_ms: 20,
        }
    }
}

impl ConditionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn debounce_max(&self) -> Duration {
        Duration::from_millis(self.debounce_max_ms)
    }
}

/// Custom variable cascade flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariablesConfig {
    pub cascade_debounce_ms: u64,
    pub cascade_max_ms: u64,
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            cascade_debounce_ms: 10,
            cascade_max_ms: 50,
        }
    }
}

impl VariablesConfig {
    pub fn cascade_debounce(&self) -> Duration {
        Duration::from_millis(self.cascade_debounce_ms)
    }

    pub fn cascade_max(&self) -> Duration {
        Duration::from_millis(self.cascade_max_ms)
    }
}

/// Blink pseudo-variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Shortest accepted blink interval
    pub min_interval_ms: u64,
    /// How often unused blink rates are swept
    pub sweep_interval_secs: u64,
    /// Periods without a probe before a rate is dropped
    pub expiry_periods: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            sweep_interval_secs: 30,
            expiry_periods: 10,
        }
    }
}

impl BlinkConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AutomationConfig {
    /// Apply environment overrides
    ///
    /// `lookup` resolves a variable name; the loader passes `std::env::var`.
    /// `SA_LOG` wins over `RUST_LOG`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(filter) = lookup("SA_LOG").or_else(|| lookup("RUST_LOG")) {
            self.logging.filter = filter;
        }

        if let Some(raw) = lookup("SA_TICK_INTERVAL_MS") {
            self.clock.tick_interval_ms =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: "SA_TICK_INTERVAL_MS".to_string(),
                        reason: e.to_string(),
                    })?;
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.clock.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "clock.tick_interval_ms must be positive".to_string(),
            });
        }
        if self.conditions.debounce_ms > self.conditions.debounce_max_ms {
            return Err(ConfigError::ValidationFailed {
                message: "conditions.debounce_ms exceeds conditions.debounce_max_ms".to_string(),
            });
        }
        if self.variables.cascade_debounce_ms > self.variables.cascade_max_ms {
            return Err(ConfigError::ValidationFailed {
                message: "variables.cascade_debounce_ms exceeds variables.cascade_max_ms"
                    .to_string(),
            });
        }
        if self.blink.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "blink.sweep_interval_secs must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AutomationConfig::default();
        assert_eq!(config.clock.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.conditions.debounce(), Duration::from_millis(10));
        assert_eq!(config.conditions.debounce_max(), Duration::from_millis(20));
        assert_eq!(config.variables.cascade_max(), Duration::from_millis(50));
        assert_eq!(config.blink.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.filter, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AutomationConfig::default();
        config
            .apply_overrides(env(&[
                ("RUST_LOG", "warn"),
                ("SA_LOG", "sa_triggers=trace"),
                ("SA_TICK_INTERVAL_MS", " 250 "),
            ]))
            .unwrap();
        assert_eq!(config.logging.filter, "sa_triggers=trace");
        assert_eq!(config.clock.tick_interval_ms, 250);

        let mut config = AutomationConfig::default();
        config.apply_overrides(env(&[("RUST_LOG", "debug")])).unwrap();
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_invalid_tick_override() {
        let mut config = AutomationConfig::default();
        let err = config
            .apply_overrides(env(&[("SA_TICK_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = AutomationConfig::default();
        config.clock.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AutomationConfig::default();
        config.conditions.debounce_ms = 30;
        assert!(config.validate().is_err());
    }
}
