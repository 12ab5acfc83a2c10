//! Broker controller CLI.
//!
//! - `broker-controller run` - Keep the broker in sync until interrupted
//! - `broker-controller sync` - Apply the desired addresses once
//! - `broker-controller stats` - Print one statistics snapshot as JSON

mod args;
pub mod commands;

pub use args::{Cli, Commands, RunArgs, StatsArgs, SyncArgs};
