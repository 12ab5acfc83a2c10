//! Common test harness utilities for integration tests.
//!
//! This module provides:
//! - An in-memory `MockBroker` with Artemis-like management semantics
//! - A `MockConnector` handing that broker to a controller
//! - Call counters, failure injection and an in-flight high-water mark

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use async_trait::async_trait;
use broker_controller::management::{
    BrokerConnector, BrokerEndpoint, BrokerManagement, ManagementError, ManagementResult,
    QueueSpec, SharedManagement,
};
use broker_controller::model::{
    AddressInfo, AddressSettings, AddressType, ConnectionInfo, DesiredAddress, QueueInfo,
    RoutingType,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MUTATIONS: &[&str] = &[
    "create_address",
    "delete_address",
    "create_queue",
    "destroy_queue",
    "add_address_settings",
    "remove_address_settings",
];

#[derive(Default)]
struct BrokerState {
    addresses: BTreeMap<String, Vec<RoutingType>>,
    queues: BTreeMap<String, QueueInfo>,
    settings: BTreeMap<String, AddressSettings>,
    connections: Vec<ConnectionInfo>,
    default_max_size: Option<u64>,
    latency: Option<Duration>,
    create_failures: BTreeMap<String, ManagementError>,
    delete_failures: BTreeMap<String, ManagementError>,
    listing_failure: Option<ManagementError>,
    transport_down: bool,
}

/// In-memory broker. Mutations follow Artemis: duplicate creates report
/// `AlreadyExists`, deletes of missing entities report `NotFound`.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shared(self: &Arc<Self>) -> SharedManagement {
        self.clone()
    }

    // --- setup ---------------------------------------------------------------

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn set_default_max_size(&self, size: Option<u64>) {
        self.state.lock().default_max_size = size;
    }

    pub fn fail_create(&self, address: &str, error: ManagementError) {
        self.state
            .lock()
            .create_failures
            .insert(address.to_string(), error);
    }

    pub fn fail_delete(&self, address: &str, error: ManagementError) {
        self.state
            .lock()
            .delete_failures
            .insert(address.to_string(), error);
    }

    pub fn fail_listings(&self, error: Option<ManagementError>) {
        self.state.lock().listing_failure = error;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.create_failures.clear();
        state.delete_failures.clear();
        state.listing_failure = None;
    }

    pub fn set_transport_down(&self, down: bool) {
        self.state.lock().transport_down = down;
    }

    pub fn seed_address(&self, name: &str, routing: RoutingType) {
        self.state
            .lock()
            .addresses
            .insert(name.to_string(), vec![routing]);
    }

    pub fn seed_queue(&self, queue: QueueInfo) {
        let mut state = self.state.lock();
        if let Some(routing) = queue.routing_type {
            state
                .addresses
                .entry(queue.address.clone())
                .or_insert_with(|| vec![routing]);
        }
        state.queues.insert(queue.name.clone(), queue);
    }

    pub fn add_connection(&self, connection: ConnectionInfo) {
        self.state.lock().connections.push(connection);
    }

    // --- inspection ----------------------------------------------------------

    pub fn address_names(&self) -> Vec<String> {
        self.state.lock().addresses.keys().cloned().collect()
    }

    pub fn routing_of(&self, address: &str) -> Option<Vec<RoutingType>> {
        self.state.lock().addresses.get(address).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.state.lock().queues.keys().cloned().collect()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    pub fn settings_for(&self, address: &str) -> Option<AddressSettings> {
        self.state.lock().settings.get(address).copied()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn mutations(&self) -> usize {
        MUTATIONS.iter().map(|op| self.calls(op)).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Highest number of mutations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Assert that the managed part of the broker matches `desired` exactly.
    pub fn verify_addresses(&self, desired: &[DesiredAddress]) {
        let state = self.state.lock();
        for want in desired {
            let routing = state
                .addresses
                .get(&want.address)
                .unwrap_or_else(|| panic!("address {} missing", want.address));
            assert_eq!(
                routing,
                &vec![want.kind.routing_type()],
                "routing of {}",
                want.address
            );
            let backing = state
                .queues
                .get(&want.address)
                .is_some_and(|q| q.address == want.address);
            assert_eq!(
                backing,
                want.kind == AddressType::Queue,
                "backing queue of {}",
                want.address
            );
        }
        let managed = state
            .addresses
            .keys()
            .filter(|name| !is_broker_internal(name))
            .count();
        assert_eq!(managed, desired.len(), "unexpected addresses on broker");
        for queue in state.queues.values() {
            assert!(
                state.addresses.contains_key(&queue.address),
                "orphan queue {}",
                queue.name
            );
        }
    }

    // --- call plumbing -------------------------------------------------------

    async fn enter(&self, operation: &'static str) -> ManagementResult<Option<CallGuard<'_>>> {
        *self.calls.lock().entry(operation).or_default() += 1;
        let guard = if MUTATIONS.contains(&operation) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Some(CallGuard(&self.in_flight))
        } else {
            None
        };
        let latency = self.state.lock().latency;
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
        if self.state.lock().transport_down {
            return Err(ManagementError::Connection("connection refused".into()));
        }
        Ok(guard)
    }

    fn listing_failure(&self) -> ManagementResult<()> {
        match self.state.lock().listing_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn is_broker_internal(name: &str) -> bool {
    name.starts_with("activemq.") || name.starts_with('$') || name == "DLQ" || name == "ExpiryQueue"
}

#[async_trait]
impl BrokerManagement for MockBroker {
    async fn list_addresses(&self) -> ManagementResult<Vec<AddressInfo>> {
        let _call = self.enter("list_addresses").await?;
        self.listing_failure()?;
        Ok(self
            .state
            .lock()
            .addresses
            .iter()
            .map(|(name, routing)| AddressInfo {
                name: name.clone(),
                routing_types: routing.clone(),
            })
            .collect())
    }

    async fn list_queues(&self) -> ManagementResult<Vec<QueueInfo>> {
        let _call = self.enter("list_queues").await?;
        self.listing_failure()?;
        Ok(self.state.lock().queues.values().cloned().collect())
    }

    async fn list_connections(&self) -> ManagementResult<Vec<ConnectionInfo>> {
        let _call = self.enter("list_connections").await?;
        self.listing_failure()?;
        Ok(self.state.lock().connections.clone())
    }

    async fn create_address(&self, name: &str, routing: RoutingType) -> ManagementResult<()> {
        let _call = self.enter("create_address").await?;
        let mut state = self.state.lock();
        if let Some(err) = state.create_failures.get(name) {
            return Err(err.clone());
        }
        if state.addresses.contains_key(name) {
            return Err(ManagementError::AlreadyExists(format!(
                "AMQ229204: Address already exists: {name}"
            )));
        }
        state.addresses.insert(name.to_string(), vec![routing]);
        Ok(())
    }

    async fn delete_address(&self, name: &str, force: bool) -> ManagementResult<()> {
        let _call = self.enter("delete_address").await?;
        let mut state = self.state.lock();
        if let Some(err) = state.delete_failures.get(name) {
            return Err(err.clone());
        }
        if !state.addresses.contains_key(name) {
            return Err(ManagementError::NotFound(format!(
                "AMQ229203: Address Does Not Exist: {name}"
            )));
        }
        let bound = state.queues.values().any(|q| q.address == name);
        if bound && !force {
            return Err(ManagementError::failed(
                "deleteAddress",
                format!("AMQ229205: Address {name} has bindings"),
            ));
        }
        state.queues.retain(|_, q| q.address != name);
        state.addresses.remove(name);
        Ok(())
    }

    async fn create_queue(&self, queue: &QueueSpec) -> ManagementResult<()> {
        let _call = self.enter("create_queue").await?;
        let mut state = self.state.lock();
        if let Some(err) = state.create_failures.get(&queue.address) {
            return Err(err.clone());
        }
        if state.queues.contains_key(&queue.name) {
            return Err(ManagementError::AlreadyExists(format!(
                "AMQ229019: Binding already exists {}",
                queue.name
            )));
        }
        if !state.addresses.contains_key(&queue.address) {
            return Err(ManagementError::failed(
                "createQueue",
                format!("address {} does not exist and auto-create is off", queue.address),
            ));
        }
        let mut info = QueueInfo::new(&queue.name, &queue.address, queue.routing);
        info.durable = queue.durable;
        state.queues.insert(queue.name.clone(), info);
        Ok(())
    }

    async fn destroy_queue(&self, name: &str) -> ManagementResult<()> {
        let _call = self.enter("destroy_queue").await?;
        let mut state = self.state.lock();
        match state.queues.remove(name) {
            Some(_) => Ok(()),
            None => Err(ManagementError::NotFound(format!(
                "AMQ229017: Queue {name} does not exist"
            ))),
        }
    }

    async fn add_address_settings(
        &self,
        address_match: &str,
        settings: &AddressSettings,
    ) -> ManagementResult<()> {
        let _call = self.enter("add_address_settings").await?;
        self.state
            .lock()
            .settings
            .insert(address_match.to_string(), *settings);
        Ok(())
    }

    async fn remove_address_settings(&self, address_match: &str) -> ManagementResult<()> {
        let _call = self.enter("remove_address_settings").await?;
        self.state.lock().settings.remove(address_match);
        Ok(())
    }

    async fn default_max_size_bytes(&self) -> ManagementResult<Option<u64>> {
        let _call = self.enter("default_max_size_bytes").await?;
        Ok(self.state.lock().default_max_size)
    }

    async fn close(&self) -> ManagementResult<()> {
        *self.calls.lock().entry("close").or_default() += 1;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared `MockBroker`; can be told to fail or stall the handshake.
pub struct MockConnector {
    pub broker: Arc<MockBroker>,
    failure: Mutex<Option<ManagementError>>,
    delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(broker: Arc<MockBroker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn fail_with(&self, error: Option<ManagementError>) {
        *self.failure.lock() = error;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, _endpoint: &BrokerEndpoint) -> ManagementResult<SharedManagement> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.broker.shared()),
        }
    }
}

pub fn endpoint() -> BrokerEndpoint {
    BrokerEndpoint::new("http://mock-broker:8161/console")
}
