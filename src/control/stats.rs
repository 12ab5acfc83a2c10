//! Broker statistics collection.
//!
//! Each poll reads addresses, queues and connections, folds them into a
//! [`StatsSnapshot`] and publishes it once as
//! [`ControllerEvent::AddressStatsRetrieved`]. Snapshots are full replacements;
//! nothing carries over between polls.

use super::ControllerEvent;
use crate::config::SyncConfig;
use crate::management::{ManagementResult, SharedManagement};
use crate::model::{AddressInfo, ConnectionInfo, QueueInfo, RoutingType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Percentage reported for an address present on the broker. One controller
/// drives one broker, so presence means fully propagated.
pub const FULLY_PROPAGATED: u32 = 100;

/// Counters of one broker queue bound to an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub name: String,
    pub durable: bool,
    pub messages: u64,
    pub consumers: u64,
    pub enqueued: u64,
    pub delivering: u64,
    pub acknowledged: u64,
    pub expired: u64,
    pub killed: u64,
}

impl From<&QueueInfo> for ShardStats {
    fn from(queue: &QueueInfo) -> Self {
        Self {
            name: queue.name.clone(),
            durable: queue.durable,
            messages: queue.message_count,
            consumers: queue.consumer_count,
            enqueued: queue.messages_added,
            delivering: queue.delivering_count,
            acknowledged: queue.messages_acked,
            expired: queue.messages_expired,
            killed: queue.messages_killed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressStats {
    pub propagated: u32,
    pub messages_in: u64,
    pub messages_out: u64,
    pub depth: u64,
    pub delivering: u64,
    pub expired: u64,
    pub killed: u64,
    pub senders: u64,
    pub receivers: u64,
    pub shards: Vec<ShardStats>,
    #[serde(skip)]
    multicast: bool,
}

impl AddressStats {
    fn add_shard(&mut self, queue: &QueueInfo) {
        self.messages_in += queue.messages_added;
        self.messages_out += queue.messages_acked;
        self.depth += queue.message_count;
        self.delivering += queue.delivering_count;
        self.expired += queue.messages_expired;
        self.killed += queue.messages_killed;
        self.shards.push(ShardStats::from(queue));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub id: String,
    pub client_address: String,
    pub protocol: Option<String>,
    pub senders: u64,
    pub receivers: u64,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub addresses: BTreeMap<String, AddressStats>,
    pub connections: Vec<ConnectionStats>,
}

impl StatsSnapshot {
    pub fn get(&self, address: &str) -> Option<&AddressStats> {
        self.addresses.get(address)
    }

    /// Fold one poll's listings into per-address and per-connection rollups.
    pub fn aggregate(
        addresses: &[AddressInfo],
        queues: &[QueueInfo],
        connections: &[ConnectionInfo],
        filter: &SyncConfig,
    ) -> Self {
        let mut stats: BTreeMap<String, AddressStats> = BTreeMap::new();
        for info in addresses.iter().filter(|a| !filter.is_unmanaged(&a.name)) {
            stats.insert(
                info.name.clone(),
                AddressStats {
                    propagated: FULLY_PROPAGATED,
                    multicast: info.routing_types.contains(&RoutingType::Multicast),
                    ..Default::default()
                },
            );
        }
        for queue in queues.iter().filter(|q| !filter.is_unmanaged(&q.address)) {
            // a queue can outlive its address listing when topology changes mid-poll
            let entry = stats
                .entry(queue.address.clone())
                .or_insert_with(|| AddressStats {
                    multicast: queue.routing_type == Some(RoutingType::Multicast),
                    ..Default::default()
                });
            entry.add_shard(queue);
        }
        for entry in stats.values_mut() {
            entry.receivers = if entry.multicast {
                entry.shards.len() as u64
            } else {
                entry.shards.iter().map(|s| s.consumers).sum()
            };
        }

        let mut senders: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut rollups = Vec::with_capacity(connections.len());
        for conn in connections {
            let mut touched = BTreeSet::new();
            for link in &conn.senders {
                senders
                    .entry(link.address.as_str())
                    .or_default()
                    .insert(conn.id.as_str());
                touched.insert(link.address.clone());
            }
            for link in &conn.receivers {
                touched.insert(link.address.clone());
            }
            rollups.push(ConnectionStats {
                id: conn.id.clone(),
                client_address: conn.client_address.clone(),
                protocol: conn.protocol.clone(),
                senders: conn.senders.len() as u64,
                receivers: conn.receivers.len() as u64,
                addresses: touched.into_iter().collect(),
            });
        }
        for (address, ids) in senders {
            if let Some(entry) = stats.get_mut(address) {
                entry.senders = ids.len() as u64;
            }
        }

        Self {
            addresses: stats,
            connections: rollups,
        }
    }
}

pub struct StatsCollector {
    client: SharedManagement,
    filter: SyncConfig,
    events: broadcast::Sender<ControllerEvent>,
}

impl StatsCollector {
    pub fn new(
        client: SharedManagement,
        filter: SyncConfig,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            client,
            filter,
            events,
        }
    }

    /// Poll the broker once and publish the resulting snapshot.
    pub async fn retrieve_stats(&self) -> ManagementResult<Arc<StatsSnapshot>> {
        let (addresses, queues, connections) = tokio::try_join!(
            self.client.list_addresses(),
            self.client.list_queues(),
            self.client.list_connections(),
        )?;
        let snapshot = Arc::new(StatsSnapshot::aggregate(
            &addresses,
            &queues,
            &connections,
            &self.filter,
        ));
        tracing::debug!(
            addresses = snapshot.addresses.len(),
            connections = snapshot.connections.len(),
            "address stats retrieved"
        );
        // no subscribers is not an error
        let _ = self
            .events
            .send(ControllerEvent::AddressStatsRetrieved(snapshot.clone()));
        Ok(snapshot)
    }
}
