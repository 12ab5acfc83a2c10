//! Address reconciliation.
//!
//! A pass reads the broker's addresses and queues, diffs them against the
//! desired set, and applies the difference: every delete completes before any
//! create is dispatched. Both phases fan out with bounded concurrency.
//! Per-address failures are collected and reported together once the pass is
//! over; a transport failure ends the pass immediately.

use super::settings::AddressSettingsResolver;
use crate::config::SyncConfig;
use crate::management::{
    ManagementError, ManagementResult, ManagementResultExt, QueueSpec, SharedManagement,
};
use crate::model::{join_topology, ActualAddress, DesiredAddress};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Create,
    Delete,
    Repair,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Repair => "repair",
        })
    }
}

/// A single address whose create/delete failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFailure {
    pub address: String,
    pub operation: SyncOperation,
    pub error: ManagementError,
}

impl fmt::Display for AddressFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.address, self.operation, self.error)
    }
}

/// Outcome counts of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub deleted: usize,
    pub repaired: usize,
    pub unchanged: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("duplicate address {0:?} in desired set")]
    DuplicateAddress(String),
    #[error("broker unreachable during sync: {0}")]
    Transport(#[source] ManagementError),
    #[error("{} address operation(s) failed: {}", .failures.len(), join_failures(.failures))]
    Partial {
        failures: Vec<AddressFailure>,
        report: SyncReport,
    },
}

impl SyncError {
    pub fn failures(&self) -> &[AddressFailure] {
        match self {
            Self::Partial { failures, .. } => failures,
            Self::DuplicateAddress(_) | Self::Transport(_) => &[],
        }
    }
}

fn join_failures(failures: &[AddressFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Difference between the desired set and the broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub to_delete: Vec<ActualAddress>,
    pub to_create: Vec<DesiredAddress>,
    /// Queue-typed addresses present on the broker without their backing queue.
    pub to_repair: Vec<DesiredAddress>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn compute(
        desired: &[DesiredAddress],
        actual: &BTreeMap<String, ActualAddress>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        let mut wanted: HashMap<&str, &DesiredAddress> = HashMap::with_capacity(desired.len());
        for address in desired {
            if wanted.insert(address.address.as_str(), address).is_some() {
                return Err(SyncError::DuplicateAddress(address.address.clone()));
            }
        }

        let mut plan = SyncPlan::default();
        for (name, existing) in actual {
            if config.is_unmanaged(name) {
                continue;
            }
            match wanted.get(name.as_str()) {
                Some(want) if existing.is_compatible_with(want.kind.shape()) => {}
                // missing, or present with a different shape: delete, then recreate below
                _ => plan.to_delete.push(existing.clone()),
            }
        }

        for address in desired {
            if config.is_unmanaged(&address.address) {
                tracing::warn!(address = %address.address, "ignoring desired address reserved for the broker");
                continue;
            }
            match actual.get(&address.address) {
                Some(existing) if existing.is_compatible_with(address.kind.shape()) => {
                    if address.kind.has_backing_queue() && !existing.has_backing_queue() {
                        plan.to_repair.push(address.clone());
                    } else {
                        plan.unchanged += 1;
                    }
                }
                _ => plan.to_create.push(address.clone()),
            }
        }
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty() && self.to_repair.is_empty()
    }
}

pub struct ReconciliationEngine {
    client: SharedManagement,
    resolver: AddressSettingsResolver,
    config: SyncConfig,
}

impl ReconciliationEngine {
    pub fn new(
        client: SharedManagement,
        resolver: AddressSettingsResolver,
        config: SyncConfig,
    ) -> Self {
        Self {
            client,
            resolver,
            config,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Current broker topology; both listings are treated as one snapshot.
    pub async fn fetch_actual(&self) -> ManagementResult<BTreeMap<String, ActualAddress>> {
        let (addresses, queues) =
            tokio::try_join!(self.client.list_addresses(), self.client.list_queues())?;
        Ok(join_topology(addresses, queues))
    }

    pub async fn plan(&self, desired: &[DesiredAddress]) -> Result<SyncPlan, SyncError> {
        let actual = self.fetch_actual().await.map_err(SyncError::Transport)?;
        SyncPlan::compute(desired, &actual, &self.config)
    }

    /// Bring the broker in line with `desired`.
    pub async fn sync(&self, desired: &[DesiredAddress]) -> Result<SyncReport, SyncError> {
        let plan = self.plan(desired).await?;
        let mut report = SyncReport {
            unchanged: plan.unchanged,
            ..Default::default()
        };
        if plan.is_empty() {
            tracing::debug!(unchanged = report.unchanged, "broker addresses already in sync");
            return Ok(report);
        }
        tracing::info!(
            delete = plan.to_delete.len(),
            create = plan.to_create.len(),
            repair = plan.to_repair.len(),
            unchanged = plan.unchanged,
            concurrency = self.concurrency(),
            "applying address changes"
        );

        let mut failures = Vec::new();
        let mut failed_deletes = HashSet::new();

        let mut deletes = stream::iter(plan.to_delete.iter())
            .map(|existing| async move { (existing, self.delete_one(existing).await) })
            .buffer_unordered(self.concurrency())
            .boxed();
        while let Some((existing, result)) = deletes.next().await {
            match result {
                Ok(()) => report.deleted += 1,
                Err(err) if err.is_transport() => return Err(SyncError::Transport(err)),
                Err(err) => {
                    tracing::warn!(address = %existing.address, error = %err, "address delete failed");
                    failed_deletes.insert(existing.address.clone());
                    failures.push(AddressFailure {
                        address: existing.address.clone(),
                        operation: SyncOperation::Delete,
                        error: err,
                    });
                }
            }
        }
        drop(deletes);

        // a type change whose delete failed must not be recreated on top of the old address
        let work: Vec<(&DesiredAddress, SyncOperation)> = plan
            .to_create
            .iter()
            .filter(|a| !failed_deletes.contains(&a.address))
            .map(|a| (a, SyncOperation::Create))
            .chain(plan.to_repair.iter().map(|a| (a, SyncOperation::Repair)))
            .collect();
        let default_size = OnceCell::new();
        let default_size = &default_size;
        let mut outcomes = stream::iter(work)
            .map(|(address, operation)| async move {
                let result = match operation {
                    SyncOperation::Repair => self.repair_one(address).await,
                    SyncOperation::Create | SyncOperation::Delete => {
                        self.create_one(address, default_size).await
                    }
                };
                (address, operation, result)
            })
            .buffer_unordered(self.concurrency())
            .boxed();
        while let Some((address, operation, result)) = outcomes.next().await {
            match (operation, result) {
                (SyncOperation::Repair, Ok(())) => report.repaired += 1,
                (_, Ok(())) => report.created += 1,
                (_, Err(err)) if err.is_transport() => return Err(SyncError::Transport(err)),
                (operation, Err(err)) => {
                    tracing::warn!(address = %address.address, %operation, error = %err, "address apply failed");
                    failures.push(AddressFailure {
                        address: address.address.clone(),
                        operation,
                        error: err,
                    });
                }
            }
        }

        tracing::info!(
            created = report.created,
            deleted = report.deleted,
            repaired = report.repaired,
            failed = failures.len(),
            "address sync pass finished"
        );
        if failures.is_empty() {
            Ok(report)
        } else {
            failures.sort_by(|a, b| a.address.cmp(&b.address));
            Err(SyncError::Partial { failures, report })
        }
    }

    async fn delete_one(&self, existing: &ActualAddress) -> ManagementResult<()> {
        for queue in &existing.queues {
            self.client.destroy_queue(&queue.name).await.tolerated()?;
        }
        let removed = self
            .client
            .delete_address(&existing.address, true)
            .await
            .tolerated()?;
        self.client
            .remove_address_settings(&existing.address)
            .await
            .tolerated()?;
        tracing::debug!(address = %existing.address, queues = existing.queues.len(), removed, "deleted address");
        Ok(())
    }

    async fn create_one(
        &self,
        address: &DesiredAddress,
        default_size: &OnceCell<Option<u64>>,
    ) -> ManagementResult<()> {
        let settings = self
            .resolver
            .resolve(address, async {
                default_size
                    .get_or_try_init(|| self.client.default_max_size_bytes())
                    .await
                    .copied()
            })
            .await?;
        if !settings.is_empty() {
            self.client
                .add_address_settings(&address.address, &settings)
                .await?;
        }
        let routing = address.kind.routing_type();
        let created = self
            .client
            .create_address(&address.address, routing)
            .await
            .tolerated()?;
        if address.kind.has_backing_queue() {
            self.client
                .create_queue(&QueueSpec::backing(&address.address))
                .await
                .tolerated()?;
        }
        tracing::debug!(address = %address.address, kind = %address.kind, %routing, created, "created address");
        Ok(())
    }

    async fn repair_one(&self, address: &DesiredAddress) -> ManagementResult<()> {
        self.client
            .create_queue(&QueueSpec::backing(&address.address))
            .await
            .tolerated()?;
        tracing::debug!(address = %address.address, "restored backing queue");
        Ok(())
    }
}
