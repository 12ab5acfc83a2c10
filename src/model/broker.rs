//! Broker-reported topology: addresses, queues and connections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::address::AddressShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutingType {
    Anycast,
    Multicast,
}

impl RoutingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anycast => "ANYCAST",
            Self::Multicast => "MULTICAST",
        }
    }
}

impl fmt::Display for RoutingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ANYCAST" => Ok(Self::Anycast),
            "MULTICAST" => Ok(Self::Multicast),
            other => anyhow::bail!("unknown routing type {}", other),
        }
    }
}

/// One entry of the broker's address listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub name: String,
    pub routing_types: Vec<RoutingType>,
}

impl AddressInfo {
    pub fn new(name: impl Into<String>, routing: RoutingType) -> Self {
        Self {
            name: name.into(),
            routing_types: vec![routing],
        }
    }
}

/// Broker queue with its counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub address: String,
    pub routing_type: Option<RoutingType>,
    pub durable: bool,
    pub temporary: bool,
    pub consumer_count: u64,
    pub message_count: u64,
    pub messages_added: u64,
    pub messages_acked: u64,
    pub delivering_count: u64,
    pub messages_expired: u64,
    pub messages_killed: u64,
}

impl QueueInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>, routing: RoutingType) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type: Some(routing),
            durable: true,
            ..Default::default()
        }
    }
}

/// A link attached to a connection; `address` is the destination of a sender
/// or the source of a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub client_address: String,
    pub protocol: Option<String>,
    pub senders: Vec<LinkInfo>,
    pub receivers: Vec<LinkInfo>,
}

impl ConnectionInfo {
    pub fn new(id: impl Into<String>, client_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client_address: client_address.into(),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, destination: impl Into<String>) -> Self {
        self.senders.push(LinkInfo {
            address: destination.into(),
        });
        self
    }

    pub fn with_receiver(mut self, source: impl Into<String>) -> Self {
        self.receivers.push(LinkInfo {
            address: source.into(),
        });
        self
    }
}

/// An address as it currently exists on the broker, with the queues bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualAddress {
    pub address: String,
    pub routing_types: Vec<RoutingType>,
    pub queues: Vec<QueueInfo>,
}

impl ActualAddress {
    /// Queue-typed addresses carry a queue named after themselves.
    pub fn has_backing_queue(&self) -> bool {
        self.queues.iter().any(|q| q.name == self.address)
    }

    pub fn is_multicast(&self) -> bool {
        self.routing_types.contains(&RoutingType::Multicast)
    }

    /// Whether this address can serve the requested shape without being recreated.
    /// Only the routing type decides. Consumers of an anycast address get a
    /// queue named after it, so a same-named queue says nothing about how the
    /// address was declared; a missing backing queue is repaired instead.
    pub fn is_compatible_with(&self, shape: AddressShape) -> bool {
        self.routing_types.len() == 1 && self.routing_types[0] == shape.routing
    }
}

/// Join the address and queue listings into one snapshot keyed by address name.
/// Queues whose address is missing from the listing are dropped: the address
/// vanished between the two queries.
pub fn join_topology(
    addresses: Vec<AddressInfo>,
    queues: Vec<QueueInfo>,
) -> BTreeMap<String, ActualAddress> {
    let mut actual: BTreeMap<String, ActualAddress> = addresses
        .into_iter()
        .map(|info| {
            (
                info.name.clone(),
                ActualAddress {
                    address: info.name,
                    routing_types: info.routing_types,
                    queues: Vec::new(),
                },
            )
        })
        .collect();
    for queue in queues {
        if let Some(entry) = actual.get_mut(&queue.address) {
            entry.queues.push(queue);
        }
    }
    actual
}
