//! Configuration file loading

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

use crate::config::AutomationConfig;
use crate::error::{ConfigError, ConfigResult};

/// File name the daemon looks for in its working directory
pub const DEFAULT_CONFIG_FILE: &str = "surface-automation.yaml";

/// Load, override from the environment and validate a configuration file
///
/// A missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<AutomationConfig> {
    let path = path.as_ref();

    let mut config = match fs::read_to_string(path) {
        Ok(content) => load_config_str(&content, path)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No configuration file, using defaults");
            AutomationConfig::default()
        }
        Err(source) => {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Parse configuration text; `source_path` is only used in errors
pub fn load_config_str(content: &str, source_path: &Path) -> ConfigResult<AutomationConfig> {
    if content.trim().is_empty() {
        return Ok(AutomationConfig::default());
    }
    serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
        path: source_path.to_path_buf(),
        source,
    })
}
