//! Surface automation daemon
//!
//! Main entry point: loads the configuration, wires the automation core and
//! runs it until Ctrl-C.

mod runner;
mod runtime;

use anyhow::{Context, Result};
use sa_config::{load_config, DEFAULT_CONFIG_FILE};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::runtime::SurfaceAutomation;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = load_config(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let filter = EnvFilter::try_new(&config.logging.filter)
        .with_context(|| format!("invalid log filter '{}'", config.logging.filter))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(config = %config_path, "Starting surface automation");

    let automation = SurfaceAutomation::new(&config)?;
    automation.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    automation.shutdown();

    Ok(())
}
