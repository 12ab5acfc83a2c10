//! Broker management interface.
//!
//! `BrokerManagement` is the seam between the controller and a live broker:
//! every call is one request/response round trip against the broker's
//! administrative interface. `jolokia` provides the ActiveMQ Artemis
//! implementation over HTTP.

use crate::model::{AddressInfo, AddressSettings, ConnectionInfo, QueueInfo, RoutingType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod jolokia;

pub use jolokia::{JolokiaClient, JolokiaConnector};

pub type ManagementResult<T> = Result<T, ManagementError>;

/// Classified failure of a single management call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagementError {
    /// Transport-level failure; the broker could not be reached at all.
    #[error("broker unreachable: {0}")]
    Connection(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("broker request timed out: {0}")]
    Timeout(String),
    #[error("broker rejected {operation}: {message}")]
    OperationFailed { operation: String, message: String },
}

impl ManagementError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Stable short code, used in aggregate error reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Outcomes expected when concurrent reconciliation races the broker.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::NotFound(_))
    }
}

pub trait ManagementResultExt {
    /// Fold `AlreadyExists`/`NotFound` into success. `Ok(true)` means the call changed state.
    fn tolerated(self) -> ManagementResult<bool>;
}

impl ManagementResultExt for ManagementResult<()> {
    fn tolerated(self) -> ManagementResult<bool> {
        match self {
            Ok(()) => Ok(true),
            Err(err) if err.is_benign() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Declaration of a broker queue to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub address: String,
    pub routing: RoutingType,
    pub durable: bool,
}

impl QueueSpec {
    /// The durable queue backing a queue-typed address.
    pub fn backing(address: &str) -> Self {
        Self {
            name: address.to_string(),
            address: address.to_string(),
            routing: RoutingType::Anycast,
            durable: true,
        }
    }
}

/// Where and how to reach a broker's management interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Base URL of the management console, e.g. `http://broker:8161/console`.
    pub url: String,
    /// Artemis broker name used in the server control MBean.
    pub broker_name: String,
    pub request_timeout: Duration,
    pub page_size: usize,
}

impl BrokerEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            broker_name: "0.0.0.0".into(),
            request_timeout: Duration::from_secs(10),
            page_size: 500,
        }
    }
}

#[async_trait]
pub trait BrokerManagement: Send + Sync {
    async fn list_addresses(&self) -> ManagementResult<Vec<AddressInfo>>;

    async fn list_queues(&self) -> ManagementResult<Vec<QueueInfo>>;

    /// Live connections with their attached sender/receiver links.
    async fn list_connections(&self) -> ManagementResult<Vec<ConnectionInfo>>;

    async fn create_address(&self, name: &str, routing: RoutingType) -> ManagementResult<()>;

    /// Delete an address; `force` also removes every queue bound to it.
    async fn delete_address(&self, name: &str, force: bool) -> ManagementResult<()>;

    async fn create_queue(&self, queue: &QueueSpec) -> ManagementResult<()>;

    async fn destroy_queue(&self, name: &str) -> ManagementResult<()>;

    async fn add_address_settings(
        &self,
        address_match: &str,
        settings: &AddressSettings,
    ) -> ManagementResult<()>;

    async fn remove_address_settings(&self, address_match: &str) -> ManagementResult<()>;

    /// Broker-wide default `maxSizeBytes`, `None` when unbounded.
    async fn default_max_size_bytes(&self) -> ManagementResult<Option<u64>>;

    /// Release the underlying connection.
    async fn close(&self) -> ManagementResult<()>;
}

pub type SharedManagement = Arc<dyn BrokerManagement>;

/// Opens management connections; the handshake completes before `connect` returns.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> ManagementResult<SharedManagement>;
}
