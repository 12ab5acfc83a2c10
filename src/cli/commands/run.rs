//! Run command - keeps the broker reconciled until interrupted.

use super::{connect, load_addresses, load_config, log_failures};
use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::control::{AddressStats, BrokerController, ControllerError, ControllerEvent};
use crate::telemetry::{self, LogHandle};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub async fn run_controller(args: RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let log_handle = telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let controller = Arc::new(connect(&config).await?);
    let publisher = tokio::spawn(republish_stats(controller.subscribe(), log_address_stats));
    let poller =
        controller.spawn_stats_poller(Duration::from_secs(config.stats.interval_seconds));

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.sync.resync_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut passes = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if passes > 0 {
                    reload_log_level(&args.config, &log_handle);
                }
                passes += 1;
                sync_from_file(&controller, &args.addresses).await;
            }
            sig = &mut shutdown => {
                let sig = sig?;
                tracing::info!(signal = sig, "shutting down");
                break;
            }
        }
    }

    controller.close().await?;
    poller.await.context("stats poller panicked")?;
    let snapshots = publisher.await.context("stats publisher panicked")?;
    tracing::debug!(snapshots, "stats publisher stopped");
    Ok(())
}

/// Feeds every address of each published snapshot to `sink` until the
/// controller closes. Returns the number of snapshots seen.
async fn republish_stats<F>(mut events: broadcast::Receiver<ControllerEvent>, mut sink: F) -> usize
where
    F: FnMut(&str, &AddressStats),
{
    let mut snapshots = 0;
    loop {
        match events.recv().await {
            Ok(ControllerEvent::AddressStatsRetrieved(snapshot)) => {
                snapshots += 1;
                for (address, stats) in &snapshot.addresses {
                    sink(address, stats);
                }
            }
            Ok(ControllerEvent::Ready) => {}
            Ok(ControllerEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "stats publisher lagged");
            }
        }
    }
    snapshots
}

fn log_address_stats(address: &str, stats: &AddressStats) {
    tracing::info!(
        address,
        propagated = stats.propagated,
        messages_in = stats.messages_in,
        messages_out = stats.messages_out,
        depth = stats.depth,
        senders = stats.senders,
        receivers = stats.receivers,
        "address stats"
    );
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt()).context("register SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// A bad address file or a failed pass is logged; the next tick retries.
async fn sync_from_file(controller: &BrokerController, path: &Path) {
    let desired = match load_addresses(path) {
        Ok(desired) => desired,
        Err(err) => {
            tracing::warn!(error = ?err, "skipping sync, address list unreadable");
            return;
        }
    };
    match controller.sync(&desired).await {
        Ok(report) => tracing::info!(
            created = report.created,
            deleted = report.deleted,
            repaired = report.repaired,
            unchanged = report.unchanged,
            "sync pass complete"
        ),
        Err(ControllerError::Sync(err)) => {
            log_failures(&err);
            tracing::warn!(error = %err, "sync pass incomplete");
        }
        Err(err) => tracing::warn!(error = %err, "sync pass failed"),
    }
}

fn reload_log_level(path: &Path, handle: &LogHandle) {
    match Config::load(path) {
        Ok(config) => {
            if let Err(err) = telemetry::set_log_level(handle, config.telemetry.log_level.as_deref())
            {
                tracing::warn!(error = ?err, "log level not updated");
            }
        }
        Err(err) => tracing::debug!(error = ?err, "config not re-read"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StatsSnapshot;
    use std::collections::BTreeMap;

    fn snapshot(names: &[&str]) -> Arc<StatsSnapshot> {
        let addresses: BTreeMap<String, AddressStats> = names
            .iter()
            .map(|name| (name.to_string(), AddressStats::default()))
            .collect();
        Arc::new(StatsSnapshot {
            addresses,
            connections: Vec::new(),
        })
    }

    #[tokio::test]
    async fn every_snapshot_reaches_the_sink_until_close() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(ControllerEvent::Ready).unwrap();
        tx.send(ControllerEvent::AddressStatsRetrieved(snapshot(&["orders", "prices"])))
            .unwrap();
        tx.send(ControllerEvent::AddressStatsRetrieved(snapshot(&["orders"])))
            .unwrap();
        tx.send(ControllerEvent::Closed).unwrap();
        tx.send(ControllerEvent::AddressStatsRetrieved(snapshot(&["late"])))
            .unwrap();

        let mut seen = Vec::new();
        let count = republish_stats(rx, |address, _| seen.push(address.to_string())).await;
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["orders", "prices", "orders"]);
    }

    #[tokio::test]
    async fn publisher_stops_when_the_controller_is_dropped() {
        let (tx, rx) = broadcast::channel(4);
        tx.send(ControllerEvent::AddressStatsRetrieved(snapshot(&["orders"])))
            .unwrap();
        drop(tx);
        let mut calls = 0;
        assert_eq!(republish_stats(rx, |_, _| calls += 1).await, 1);
        assert_eq!(calls, 1);
    }
}
