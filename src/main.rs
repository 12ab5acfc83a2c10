//! Broker controller - CLI entrypoint.
//!
//! Usage:
//!   broker-controller run --config config/broker-controller.toml --addresses addresses.json
//!   broker-controller sync --addresses addresses.json
//!   broker-controller stats --pretty

use anyhow::Result;
use broker_controller::cli::commands::{run_controller, run_stats, run_sync};
use broker_controller::cli::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_controller(args).await,
        Commands::Sync(args) => run_sync(args).await,
        Commands::Stats(args) => run_stats(args).await,
    }
}
