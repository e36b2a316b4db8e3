//! Replica health aggregation.
//!
//! Reduces the raw status a replica reports into the small state enum the
//! planner and the update engine work with. Nothing here performs I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};
use seedfleet_id::RevisionName;
use serde::{Deserialize, Serialize};

use crate::model::ResourceVersion;

// =============================================================================
// Raw Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Health of one sub-resource of a replica, as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Reconcile,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
}

/// The last operation the replica's own controller ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub state: OperationState,
    #[serde(default)]
    pub description: String,
}

/// Status exactly as reported by a replica.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReplicaStatus {
    /// Generation of the replica's own resource.
    pub generation: i64,

    /// Generation the replica's controller last acted on.
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub conditions: Vec<HealthCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Set once deletion was requested; the replica is gone when it no
    /// longer shows up at all.
    #[serde(default)]
    pub deletion_requested: bool,
}

/// A replica as returned by the replica collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedReplica {
    /// Object name, `{fleet-name}-{ordinal}`.
    pub name: String,

    /// Revision the replica was last created or updated from.
    pub revision: RevisionName,

    pub resource_version: ResourceVersion,

    pub status: RawReplicaStatus,
}

// =============================================================================
// Aggregation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaState {
    Pending,
    Creating,
    Ready,
    Updating,
    Deleting,
    Error,
}

impl ReplicaState {
    /// A create, update or delete is still running on the replica.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ReplicaState::Creating | ReplicaState::Updating | ReplicaState::Deleting
        )
    }
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReplicaState::Pending => "Pending",
            ReplicaState::Creating => "Creating",
            ReplicaState::Ready => "Ready",
            ReplicaState::Updating => "Updating",
            ReplicaState::Deleting => "Deleting",
            ReplicaState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Reduce a raw replica status to a [`ReplicaState`].
///
/// Precedence, first match wins:
/// 1. deletion requested: `Deleting`
/// 2. last operation errored or failed: `Error`
/// 3. nothing observed yet: `Pending`
/// 4. observation lags the replica's generation: `Creating` or `Updating`
/// 5. every condition true: `Ready`
/// 6. otherwise `Creating` or `Updating` depending on the last operation
pub fn aggregate(raw: &RawReplicaStatus) -> ReplicaState {
    if raw.deletion_requested {
        return ReplicaState::Deleting;
    }

    let last_kind = raw.last_operation.as_ref().map(|op| op.kind);
    if let Some(op) = &raw.last_operation {
        if matches!(op.state, OperationState::Error | OperationState::Failed) {
            return ReplicaState::Error;
        }
    }

    if raw.observed_generation == 0 && raw.conditions.is_empty() && raw.last_operation.is_none() {
        return ReplicaState::Pending;
    }

    if raw.observed_generation != raw.generation {
        // An old observation never counts as ready for the new generation.
        return if raw.observed_generation == 0 || last_kind == Some(OperationKind::Create) {
            ReplicaState::Creating
        } else {
            ReplicaState::Updating
        };
    }

    if !raw.conditions.is_empty()
        && raw
            .conditions
            .iter()
            .all(|c| c.status == ConditionStatus::True)
    {
        return ReplicaState::Ready;
    }

    match last_kind {
        Some(OperationKind::Create) | None => ReplicaState::Creating,
        _ => ReplicaState::Updating,
    }
}

/// When the replica became ready: the latest transition among its
/// conditions. `None` unless the replica is `Ready`.
pub fn ready_since(raw: &RawReplicaStatus) -> Option<DateTime<Utc>> {
    if aggregate(raw) != ReplicaState::Ready {
        return None;
    }
    raw.conditions.iter().map(|c| c.last_transition_time).max()
}

// =============================================================================
// Replica View
// =============================================================================

/// Per-pass view of one replica, keyed by ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaView {
    pub ordinal: u32,
    pub revision: RevisionName,
    pub state: ReplicaState,
    pub ready_since: Option<DateTime<Utc>>,
    pub resource_version: ResourceVersion,
}

impl ReplicaView {
    pub fn from_observed(ordinal: u32, observed: &ObservedReplica) -> Self {
        Self {
            ordinal,
            revision: observed.revision.clone(),
            state: aggregate(&observed.status),
            ready_since: ready_since(&observed.status),
            resource_version: observed.resource_version,
        }
    }

    /// How long the replica has been ready at `now`; zero when not ready.
    pub fn ready_for(&self, now: DateTime<Utc>) -> Duration {
        self.ready_since
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Ready, and for at least `min_ready`.
    pub fn is_available(&self, pacing: &Pacing) -> bool {
        self.state == ReplicaState::Ready && self.ready_for(pacing.now) >= pacing.min_ready
    }
}

/// Readiness pacing applied to ordinal progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min_ready: Duration,
    pub now: DateTime<Utc>,
}

impl Pacing {
    pub fn new(min_ready: Duration, now: DateTime<Utc>) -> Self {
        Self { min_ready, now }
    }

    /// No minimum ready time.
    pub fn immediate(now: DateTime<Utc>) -> Self {
        Self::new(Duration::ZERO, now)
    }
}
