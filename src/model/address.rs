//! Desired address definitions supplied by the agent loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::broker::RoutingType;

/// Address flavour requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Queue,
    Topic,
    Anycast,
    Multicast,
}

impl AddressType {
    pub fn routing_type(self) -> RoutingType {
        match self {
            Self::Queue | Self::Anycast => RoutingType::Anycast,
            Self::Topic | Self::Multicast => RoutingType::Multicast,
        }
    }

    /// Only queues own a durable broker queue; topic subscriptions are created by consumers.
    pub fn has_backing_queue(self) -> bool {
        matches!(self, Self::Queue)
    }

    /// Broker-observable shape of the address.
    pub fn shape(self) -> AddressShape {
        AddressShape {
            routing: self.routing_type(),
            backing_queue: self.has_backing_queue(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::Anycast => "anycast",
            Self::Multicast => "multicast",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "topic" => Ok(Self::Topic),
            "anycast" => Ok(Self::Anycast),
            "multicast" => Ok(Self::Multicast),
            other => anyhow::bail!("invalid address type {}", other),
        }
    }
}

/// What the broker can actually tell apart. `topic` and `multicast` share a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressShape {
    pub routing: RoutingType,
    pub backing_queue: bool,
}

/// Resource share requested by the address plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResources {
    /// Fraction of one broker, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PlanResources>,
}

/// Message TTL bounds in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTtl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_status: Option<PlanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ttl: Option<MessageTtl>,
}

/// An address the caller wants present on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredAddress {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: AddressType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressStatus>,
}

impl DesiredAddress {
    pub fn new(address: impl Into<String>, kind: AddressType) -> Self {
        Self {
            address: address.into(),
            kind,
            plan: None,
            status: None,
        }
    }

    pub fn queue(address: impl Into<String>) -> Self {
        Self::new(address, AddressType::Queue)
    }

    pub fn topic(address: impl Into<String>) -> Self {
        Self::new(address, AddressType::Topic)
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_status(mut self, status: AddressStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn plan_status(&self) -> Option<&PlanStatus> {
        self.status.as_ref().and_then(|s| s.plan_status.as_ref())
    }

    /// Requested broker fraction, if the plan carries one.
    pub fn broker_share(&self) -> Option<f64> {
        self.plan_status()
            .and_then(|p| p.resources.as_ref())
            .and_then(|r| r.broker)
    }

    pub fn partitions(&self) -> u32 {
        self.plan_status()
            .and_then(|p| p.partitions)
            .unwrap_or(1)
            .max(1)
    }

    pub fn message_ttl(&self) -> Option<MessageTtl> {
        self.status.as_ref().and_then(|s| s.message_ttl)
    }
}

/// Broker settings applied to an address at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_expiry_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_expiry_delay: Option<u64>,
}

impl AddressSettings {
    pub fn is_empty(&self) -> bool {
        self.max_size_bytes.is_none()
            && self.min_expiry_delay.is_none()
            && self.max_expiry_delay.is_none()
    }
}
