//! In-memory collaborators.
//!
//! Used by tests and by the controller binary when no external store is
//! wired in. The simulated replica client walks replicas through their
//! lifecycle on [`SimulatedReplicaClient::tick`] instead of running real
//! control planes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use seedfleet_events::{FleetEvent, Notification};
use seedfleet_id::{FleetKey, ReplicaKey, RevisionName};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::client::{EventSink, FleetStore, ReplicaClient, RevisionBackend};
use crate::error::{ReplicaError, StoreError};
use crate::health::{
    ConditionStatus, HealthCondition, LastOperation, ObservedReplica, OperationKind,
    OperationState, RawReplicaStatus,
};
use crate::model::{Fleet, FleetSpec, FleetStatus, ResourceVersion, Revision};

/// Sub-resource conditions every simulated replica reports.
const SIMULATED_CONDITIONS: [&str; 2] = ["APIServerAvailable", "ControlPlaneHealthy"];

type NotificationSender = mpsc::UnboundedSender<Notification>;

fn notify(sender: &Option<NotificationSender>, notification: Notification) {
    if let Some(tx) = sender {
        // a closed receiver only means nobody is watching anymore
        let _ = tx.send(notification);
    }
}

// =============================================================================
// Fleet Store
// =============================================================================

#[derive(Debug, Default)]
struct FleetState {
    fleets: BTreeMap<FleetKey, Fleet>,
    next_version: u64,
    /// Status writes to reject before accepting again.
    injected_conflicts: u32,
}

impl FleetState {
    fn next_version(&mut self) -> ResourceVersion {
        self.next_version += 1;
        ResourceVersion::new(self.next_version)
    }
}

/// Fleet store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryFleetStore {
    state: RwLock<FleetState>,
    notifier: Option<NotificationSender>,
}

impl MemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a notification for every spec change and deletion.
    pub fn with_notifications(mut self, sender: NotificationSender) -> Self {
        self.notifier = Some(sender);
        self
    }

    /// Create or replace a fleet spec.
    ///
    /// The generation is bumped only when the spec actually changes.
    pub async fn put_spec(&self, key: &FleetKey, spec: FleetSpec) -> Fleet {
        let mut state = self.state.write().await;
        let version = state.next_version();

        let fleet = match state.fleets.get_mut(key) {
            Some(existing) => {
                if existing.spec != spec {
                    existing.generation += 1;
                    existing.spec = spec;
                }
                existing.resource_version = version;
                existing.clone()
            }
            None => {
                let fleet = Fleet {
                    key: key.clone(),
                    generation: 1,
                    resource_version: version,
                    spec,
                    status: FleetStatus::default(),
                };
                state.fleets.insert(key.clone(), fleet.clone());
                fleet
            }
        };
        drop(state);

        debug!(fleet = %key, generation = fleet.generation, "fleet spec stored");
        notify(
            &self.notifier,
            Notification::FleetChanged { fleet: key.clone() },
        );
        fleet
    }

    /// Delete a fleet. Returns false if it did not exist.
    pub async fn delete(&self, key: &FleetKey) -> bool {
        let removed = self.state.write().await.fleets.remove(key).is_some();
        if removed {
            notify(
                &self.notifier,
                Notification::FleetDeleted { fleet: key.clone() },
            );
        }
        removed
    }

    /// Snapshot of a stored fleet.
    pub async fn fleet(&self, key: &FleetKey) -> Option<Fleet> {
        self.state.read().await.fleets.get(key).cloned()
    }

    /// Reject the next `count` status writes as if the fleet had been edited
    /// concurrently.
    pub async fn inject_status_conflicts(&self, count: u32) {
        self.state.write().await.injected_conflicts = count;
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn get_fleet(&self, key: &FleetKey) -> Result<Option<Fleet>, StoreError> {
        Ok(self.state.read().await.fleets.get(key).cloned())
    }

    async fn list_fleets(&self) -> Result<Vec<FleetKey>, StoreError> {
        Ok(self.state.read().await.fleets.keys().cloned().collect())
    }

    async fn update_status(
        &self,
        key: &FleetKey,
        status: FleetStatus,
        expected: ResourceVersion,
    ) -> Result<Fleet, StoreError> {
        let mut state = self.state.write().await;

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            let version = state.next_version();
            let fleet = state
                .fleets
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            fleet.resource_version = version;
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                actual: version,
            });
        }

        let version = state.next_version();
        let fleet = state
            .fleets
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if fleet.resource_version != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                actual: fleet.resource_version,
            });
        }

        fleet.status = status;
        fleet.resource_version = version;
        Ok(fleet.clone())
    }
}

// =============================================================================
// Revision Backend
// =============================================================================

/// Revision backend backed by a map.
#[derive(Debug, Default)]
pub struct MemoryRevisionBackend {
    revisions: RwLock<BTreeMap<FleetKey, BTreeMap<RevisionName, Revision>>>,
}

impl MemoryRevisionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored revisions of `fleet`.
    pub async fn count(&self, fleet: &FleetKey) -> usize {
        self.revisions
            .read()
            .await
            .get(fleet)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RevisionBackend for MemoryRevisionBackend {
    async fn list_revisions(&self, fleet: &FleetKey) -> Result<Vec<Revision>, StoreError> {
        Ok(self
            .revisions
            .read()
            .await
            .get(fleet)
            .map(|revs| revs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_revision(&self, revision: Revision) -> Result<Revision, StoreError> {
        let mut revisions = self.revisions.write().await;
        let owned = revisions.entry(revision.fleet.clone()).or_default();
        if owned.contains_key(&revision.name) {
            return Err(StoreError::AlreadyExists(revision.name.to_string()));
        }

        let mut stored = revision;
        stored.is_current = false;
        owned.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_revision(
        &self,
        fleet: &FleetKey,
        name: &RevisionName,
    ) -> Result<(), StoreError> {
        let mut revisions = self.revisions.write().await;
        let removed = revisions
            .get_mut(fleet)
            .and_then(|owned| owned.remove(name))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(name.to_string()))
        }
    }
}

// =============================================================================
// Simulated Replicas
// =============================================================================

/// Replica operations, as received by the simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaOp {
    Create,
    Update,
    Delete,
}

/// One accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaCall {
    pub op: ReplicaOp,
    pub replica: ReplicaKey,
    pub revision: Option<RevisionName>,
}

#[derive(Debug, Default)]
struct SimState {
    replicas: BTreeMap<ReplicaKey, ObservedReplica>,
    next_version: u64,
    failures: HashMap<ReplicaOp, u32>,
    calls: Vec<ReplicaCall>,
}

impl SimState {
    fn next_version(&mut self) -> ResourceVersion {
        self.next_version += 1;
        ResourceVersion::new(self.next_version)
    }

    fn take_failure(&mut self, op: ReplicaOp) -> bool {
        match self.failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Replica client that simulates control-plane replicas in memory.
///
/// Replicas start out `Creating` or `Updating` and only become `Ready` when
/// [`mark_ready`](Self::mark_ready) or [`tick`](Self::tick) says so.
/// Deleted replicas linger in `Deleting` until
/// [`finish_deletion`](Self::finish_deletion) or the next tick.
#[derive(Debug, Default)]
pub struct SimulatedReplicaClient {
    state: RwLock<SimState>,
    notifier: Option<NotificationSender>,
}

impl SimulatedReplicaClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a notification for every replica change made by the simulator.
    pub fn with_notifications(mut self, sender: NotificationSender) -> Self {
        self.notifier = Some(sender);
        self
    }

    /// Fail the next `count` calls of `op` with a transient error.
    pub async fn fail_next(&self, op: ReplicaOp, count: u32) {
        self.state.write().await.failures.insert(op, count);
    }

    /// Accepted mutations so far, oldest first.
    pub async fn calls(&self) -> Vec<ReplicaCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn replica(&self, key: &ReplicaKey) -> Option<ObservedReplica> {
        self.state.read().await.replicas.get(key).cloned()
    }

    /// Ordinals of the replicas of `fleet` that currently exist.
    pub async fn ordinals(&self, fleet: &FleetKey) -> Vec<u32> {
        self.state
            .read()
            .await
            .replicas
            .keys()
            .filter(|k| k.fleet() == fleet)
            .map(ReplicaKey::ordinal)
            .collect()
    }

    /// Report the replica healthy for its current generation.
    pub async fn mark_ready(&self, key: &ReplicaKey) -> bool {
        self.mutate(key, |replica, version| {
            let now = Utc::now();
            let status = &mut replica.status;
            if status.deletion_requested {
                return false;
            }
            status.observed_generation = status.generation;
            status.conditions = SIMULATED_CONDITIONS
                .iter()
                .map(|kind| HealthCondition {
                    kind: (*kind).to_string(),
                    status: ConditionStatus::True,
                    reason: "Healthy".to_string(),
                    message: String::new(),
                    last_transition_time: now,
                })
                .collect();
            if let Some(op) = status.last_operation.as_mut() {
                op.state = OperationState::Succeeded;
            }
            replica.resource_version = version;
            true
        })
        .await
    }

    /// Report the replica's last operation as failed.
    pub async fn mark_error(&self, key: &ReplicaKey, description: &str) -> bool {
        self.mutate(key, |replica, version| {
            let status = &mut replica.status;
            let kind = status
                .last_operation
                .as_ref()
                .map_or(OperationKind::Reconcile, |op| op.kind);
            status.last_operation = Some(LastOperation {
                kind,
                state: OperationState::Error,
                description: description.to_string(),
            });
            replica.resource_version = version;
            true
        })
        .await
    }

    /// Remove a replica whose deletion was requested.
    pub async fn finish_deletion(&self, key: &ReplicaKey) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let deleting = state
                .replicas
                .get(key)
                .is_some_and(|r| r.status.deletion_requested);
            deleting && state.replicas.remove(key).is_some()
        };
        if removed {
            notify(
                &self.notifier,
                Notification::ReplicaChanged {
                    replica: key.clone(),
                },
            );
        }
        removed
    }

    /// Remove a replica outright, as an external actor would.
    pub async fn remove(&self, key: &ReplicaKey) -> bool {
        let removed = self.state.write().await.replicas.remove(key).is_some();
        if removed {
            notify(
                &self.notifier,
                Notification::ReplicaChanged {
                    replica: key.clone(),
                },
            );
        }
        removed
    }

    /// Advance every replica one lifecycle step: pending creates and updates
    /// become ready, requested deletions complete. Errored replicas stay put.
    ///
    /// Returns the replicas that changed.
    pub async fn tick(&self) -> Vec<ReplicaKey> {
        let keys: Vec<(ReplicaKey, bool)> = {
            let state = self.state.read().await;
            state
                .replicas
                .iter()
                .filter(|(_, r)| needs_progress(&r.status))
                .map(|(k, r)| (k.clone(), r.status.deletion_requested))
                .collect()
        };

        let mut changed = Vec::with_capacity(keys.len());
        for (key, deleting) in keys {
            let done = if deleting {
                self.finish_deletion(&key).await
            } else {
                self.mark_ready(&key).await
            };
            if done {
                changed.push(key);
            }
        }
        changed
    }

    async fn mutate<F>(&self, key: &ReplicaKey, f: F) -> bool
    where
        F: FnOnce(&mut ObservedReplica, ResourceVersion) -> bool,
    {
        let changed = {
            let mut state = self.state.write().await;
            let version = state.next_version();
            match state.replicas.get_mut(key) {
                Some(replica) => f(replica, version),
                None => false,
            }
        };
        if changed {
            notify(
                &self.notifier,
                Notification::ReplicaChanged {
                    replica: key.clone(),
                },
            );
        }
        changed
    }
}

fn needs_progress(status: &RawReplicaStatus) -> bool {
    if status.deletion_requested {
        return true;
    }
    let errored = status
        .last_operation
        .as_ref()
        .is_some_and(|op| matches!(op.state, OperationState::Error | OperationState::Failed));
    !errored && status.observed_generation != status.generation
}

#[async_trait]
impl ReplicaClient for SimulatedReplicaClient {
    async fn create(
        &self,
        replica: &ReplicaKey,
        revision: &Revision,
    ) -> Result<ObservedReplica, ReplicaError> {
        let mut state = self.state.write().await;
        if state.take_failure(ReplicaOp::Create) {
            return Err(ReplicaError::Transient {
                replica: replica.clone(),
                message: "simulated create failure".to_string(),
            });
        }
        if state.replicas.contains_key(replica) {
            return Err(ReplicaError::AlreadyExists(replica.clone()));
        }

        let observed = ObservedReplica {
            name: replica.name(),
            revision: revision.name.clone(),
            resource_version: state.next_version(),
            status: RawReplicaStatus {
                generation: 1,
                observed_generation: 0,
                conditions: Vec::new(),
                last_operation: Some(LastOperation {
                    kind: OperationKind::Create,
                    state: OperationState::Processing,
                    description: String::new(),
                }),
                deletion_requested: false,
            },
        };
        state.replicas.insert(replica.clone(), observed.clone());
        state.calls.push(ReplicaCall {
            op: ReplicaOp::Create,
            replica: replica.clone(),
            revision: Some(revision.name.clone()),
        });
        info!(replica = %replica, revision = %revision.name, "[SIM] creating replica");
        Ok(observed)
    }

    async fn get(&self, replica: &ReplicaKey) -> Result<Option<ObservedReplica>, ReplicaError> {
        Ok(self.state.read().await.replicas.get(replica).cloned())
    }

    async fn list(&self, fleet: &FleetKey) -> Result<Vec<ObservedReplica>, ReplicaError> {
        Ok(self
            .state
            .read()
            .await
            .replicas
            .iter()
            .filter(|(k, _)| k.fleet() == fleet)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn update(
        &self,
        replica: &ReplicaKey,
        revision: &Revision,
        expected: ResourceVersion,
    ) -> Result<ObservedReplica, ReplicaError> {
        let mut state = self.state.write().await;
        if state.take_failure(ReplicaOp::Update) {
            return Err(ReplicaError::Transient {
                replica: replica.clone(),
                message: "simulated update failure".to_string(),
            });
        }
        let version = state.next_version();
        let current = state
            .replicas
            .get_mut(replica)
            .ok_or_else(|| ReplicaError::NotFound(replica.clone()))?;
        if current.resource_version != expected {
            return Err(ReplicaError::Conflict(replica.clone()));
        }

        current.revision = revision.name.clone();
        current.resource_version = version;
        current.status.generation += 1;
        current.status.last_operation = Some(LastOperation {
            kind: OperationKind::Reconcile,
            state: OperationState::Processing,
            description: String::new(),
        });
        let observed = current.clone();

        state.calls.push(ReplicaCall {
            op: ReplicaOp::Update,
            replica: replica.clone(),
            revision: Some(revision.name.clone()),
        });
        info!(replica = %replica, revision = %revision.name, "[SIM] updating replica");
        Ok(observed)
    }

    async fn delete(
        &self,
        replica: &ReplicaKey,
        expected: ResourceVersion,
    ) -> Result<(), ReplicaError> {
        let mut state = self.state.write().await;
        if state.take_failure(ReplicaOp::Delete) {
            return Err(ReplicaError::Transient {
                replica: replica.clone(),
                message: "simulated delete failure".to_string(),
            });
        }
        let version = state.next_version();
        let current = state
            .replicas
            .get_mut(replica)
            .ok_or_else(|| ReplicaError::NotFound(replica.clone()))?;
        if current.resource_version != expected {
            return Err(ReplicaError::Conflict(replica.clone()));
        }

        current.status.deletion_requested = true;
        current.resource_version = version;
        state.calls.push(ReplicaCall {
            op: ReplicaOp::Delete,
            replica: replica.clone(),
            revision: None,
        });
        info!(replica = %replica, "[SIM] deleting replica");
        Ok(())
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Keeps recorded events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<FleetEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FleetEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: FleetEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
