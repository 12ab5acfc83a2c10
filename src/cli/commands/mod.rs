//! CLI command implementations.

mod run;
mod stats;
mod sync;

pub use run::run_controller;
pub use stats::run_stats;
pub use sync::run_sync;

use crate::config::Config;
use crate::control::{BrokerController, SyncError};
use crate::management::JolokiaConnector;
use crate::model::DesiredAddress;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn load_config(path: &Path) -> Result<Config> {
    // Set config path via environment so Config::load_from_env picks it up
    env::set_var("BROKER_CONTROLLER_CONFIG", path.display().to_string());
    let config = Config::load_from_env()?;
    config.validate()?;
    Ok(config)
}

/// Read the desired address list, a JSON array of address objects.
pub fn load_addresses(path: &Path) -> Result<Vec<DesiredAddress>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("unable to read addresses {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("invalid address list {}", path.display()))
}

async fn connect(config: &Config) -> Result<BrokerController> {
    let controller = BrokerController::from_config(config, Arc::new(JolokiaConnector))?;
    controller
        .connect(&config.broker.endpoint())
        .await
        .with_context(|| format!("connect to {}", config.broker.url))?;
    Ok(controller)
}

fn log_failures(err: &SyncError) {
    for failure in err.failures() {
        tracing::warn!(
            address = %failure.address,
            operation = %failure.operation,
            error = %failure.error,
            "address operation failed"
        );
    }
}
