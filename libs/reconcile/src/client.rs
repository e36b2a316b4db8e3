//! Collaborator interfaces.
//!
//! The reconciler talks to three external systems:
//! - the fleet store, which holds fleet specs and status
//! - the revision backend, which persists immutable revisions
//! - the replica client, which creates, observes and deletes replicas
//!
//! Recorded events go to an [`EventSink`].

use async_trait::async_trait;
use seedfleet_events::{FleetEvent, Severity};
use seedfleet_id::{FleetKey, ReplicaKey, RevisionName};
use tracing::{info, warn};

use crate::error::{ReplicaError, StoreError};
use crate::health::ObservedReplica;
use crate::model::{Fleet, FleetStatus, ResourceVersion, Revision};

/// Fleet object storage.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Read a fleet; `None` once it was deleted.
    async fn get_fleet(&self, key: &FleetKey) -> Result<Option<Fleet>, StoreError>;

    /// Keys of every known fleet.
    async fn list_fleets(&self) -> Result<Vec<FleetKey>, StoreError>;

    /// Replace the status, provided the fleet is still at `expected`.
    async fn update_status(
        &self,
        key: &FleetKey,
        status: FleetStatus,
        expected: ResourceVersion,
    ) -> Result<Fleet, StoreError>;
}

/// Revision storage, scoped per fleet.
#[async_trait]
pub trait RevisionBackend: Send + Sync {
    async fn list_revisions(&self, fleet: &FleetKey) -> Result<Vec<Revision>, StoreError>;

    /// Persist a new revision; `AlreadyExists` when the name is taken.
    async fn create_revision(&self, revision: Revision) -> Result<Revision, StoreError>;

    async fn delete_revision(&self, fleet: &FleetKey, name: &RevisionName)
        -> Result<(), StoreError>;
}

/// Lifecycle operations on single replicas.
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    /// Create the replica from `revision`.
    async fn create(
        &self,
        replica: &ReplicaKey,
        revision: &Revision,
    ) -> Result<ObservedReplica, ReplicaError>;

    /// Observe one replica; `None` when it does not exist.
    async fn get(&self, replica: &ReplicaKey) -> Result<Option<ObservedReplica>, ReplicaError>;

    /// Every replica owned by `fleet`, in no particular order.
    async fn list(&self, fleet: &FleetKey) -> Result<Vec<ObservedReplica>, ReplicaError>;

    /// Apply `revision` to an existing replica in place.
    async fn update(
        &self,
        replica: &ReplicaKey,
        revision: &Revision,
        expected: ResourceVersion,
    ) -> Result<ObservedReplica, ReplicaError>;

    /// Request deletion. The replica stays visible in `Deleting` until gone.
    async fn delete(
        &self,
        replica: &ReplicaKey,
        expected: ResourceVersion,
    ) -> Result<(), ReplicaError>;
}

/// Destination for recorded lifecycle events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: FleetEvent);
}

/// Writes recorded events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: FleetEvent) {
        let ordinal = event.ordinal.map(i64::from).unwrap_or(-1);
        let revision = event
            .revision
            .as_ref()
            .map(RevisionName::as_str)
            .unwrap_or_default();

        match event.severity {
            Severity::Normal => info!(
                event_id = %event.event_id,
                fleet = %event.fleet,
                ordinal,
                revision,
                reason = %event.reason,
                "{}",
                event.message
            ),
            Severity::Warning => warn!(
                event_id = %event.event_id,
                fleet = %event.fleet,
                ordinal,
                revision,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}
