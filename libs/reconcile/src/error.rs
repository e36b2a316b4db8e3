//! Error types for reconciliation and its collaborators.

use std::time::Duration;

use seedfleet_id::{FleetKey, ReplicaKey};
use thiserror::Error;

use crate::model::ResourceVersion;

/// Errors returned by the fleet store and the revision backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency token mismatch.
    #[error("conflict on {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors returned by the replica collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    #[error("replica {0} already exists")]
    AlreadyExists(ReplicaKey),

    #[error("replica {0} not found")]
    NotFound(ReplicaKey),

    /// The replica changed since it was observed.
    #[error("replica {0} was modified concurrently")]
    Conflict(ReplicaKey),

    /// Create/update/delete failed for environmental reasons.
    #[error("replica {replica}: {message}")]
    Transient { replica: ReplicaKey, message: String },

    /// Listing or reading replicas failed.
    #[error("replica backend unavailable: {0}")]
    Unavailable(String),
}

impl ReplicaError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReplicaError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::NotFound(_))
    }

    /// Failures that count against the replica's retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReplicaError::Transient { .. } | ReplicaError::Unavailable(_)
        )
    }
}

/// Errors that abort a reconciliation pass.
///
/// Every variant is scoped to one fleet; the controller logs it and requeues
/// the fleet.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// Status write kept conflicting with concurrent edits.
    #[error("status of {fleet} still conflicting after {attempts} attempts")]
    SpecConflict { fleet: FleetKey, attempts: u32 },

    /// No free revision name found after salting the hash repeatedly.
    #[error("revision name of {fleet} still colliding after {attempts} attempts")]
    RevisionCollision { fleet: FleetKey, attempts: u32 },

    /// Timeout waiting on a collaborator.
    #[error("timeout after {elapsed:?} waiting for {resource}")]
    Timeout { resource: String, elapsed: Duration },

    /// The pass task died before returning.
    #[error("pass for {fleet} aborted: {message}")]
    Aborted { fleet: FleetKey, message: String },
}

/// A violated fleet invariant.
///
/// Passes that detect one abort before mutating replicas or revisions and
/// surface the message through the `InvariantViolated` status condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct InvariantViolation {
    pub message: String,
}

impl InvariantViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
