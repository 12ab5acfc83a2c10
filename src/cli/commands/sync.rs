//! Sync command - one reconciliation pass.

use super::{connect, load_addresses, load_config, log_failures};
use crate::cli::args::SyncArgs;
use crate::control::ControllerError;
use crate::telemetry;
use anyhow::Result;

pub async fn run_sync(args: SyncArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let desired = load_addresses(&args.addresses)?;
    let controller = connect(&config).await?;

    let outcome = controller.sync(&desired).await;
    controller.close().await?;
    match outcome {
        Ok(report) => {
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
        Err(err) => {
            if let ControllerError::Sync(sync_err) = &err {
                log_failures(sync_err);
            }
            Err(err.into())
        }
    }
}
