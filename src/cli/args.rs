//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Broker controller - reconciles broker addresses and reports their statistics.
#[derive(Parser)]
#[command(name = "broker-controller")]
#[command(version)]
#[command(about = "Keeps broker addresses in line with a desired address list")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect, sync, re-sync periodically and poll stats until SIGINT or SIGTERM
    Run(RunArgs),

    /// Run a single sync pass and exit
    Sync(SyncArgs),

    /// Poll broker statistics once and print them as JSON
    Stats(StatsArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/broker-controller.toml")]
    pub config: PathBuf,

    /// JSON file holding the desired address list; re-read on every re-sync
    #[arg(short, long, value_name = "PATH")]
    pub addresses: PathBuf,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/broker-controller.toml")]
    pub config: PathBuf,

    /// JSON file holding the desired address list
    #[arg(short, long, value_name = "PATH")]
    pub addresses: PathBuf,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/broker-controller.toml")]
    pub config: PathBuf,

    /// Pretty-print the snapshot
    #[arg(long)]
    pub pretty: bool,
}
