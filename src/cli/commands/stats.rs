//! Stats command - a single statistics poll.

use super::{connect, load_config};
use crate::cli::args::StatsArgs;
use crate::telemetry;
use anyhow::Result;

pub async fn run_stats(args: StatsArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let controller = connect(&config).await?;

    let outcome = controller.retrieve_stats().await;
    controller.close().await?;
    let snapshot = outcome?;
    let body = if args.pretty {
        serde_json::to_string_pretty(snapshot.as_ref())?
    } else {
        serde_json::to_string(snapshot.as_ref())?
    };
    println!("{body}");
    Ok(())
}
