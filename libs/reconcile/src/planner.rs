//! Replica ordinal planning.
//!
//! [`plan`] computes which ordinals are missing and which are out of range.
//! [`next_scale_step`] turns that plan into at most one action for the
//! current pass, honoring ordered creation and deletion.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::health::{Pacing, ReplicaState, ReplicaView};
use crate::model::PendingReason;

// =============================================================================
// Steps
// =============================================================================

/// A single replica mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create { ordinal: u32 },
    Update { ordinal: u32 },
    Delete { ordinal: u32 },
}

impl Action {
    pub fn ordinal(&self) -> u32 {
        match self {
            Action::Create { ordinal } | Action::Update { ordinal } | Action::Delete { ordinal } => {
                *ordinal
            }
        }
    }

    /// Reason recorded when this action fails.
    pub fn failure_reason(&self) -> PendingReason {
        match self {
            Action::Create { .. } => PendingReason::CreateFailed,
            Action::Update { .. } => PendingReason::UpdateFailed,
            Action::Delete { .. } => PendingReason::DeleteFailed,
        }
    }

    /// Reason recorded while this action is in flight.
    pub fn in_flight_reason(&self) -> PendingReason {
        match self {
            Action::Create { .. } => PendingReason::Creating,
            Action::Update { .. } => PendingReason::Updating,
            Action::Delete { .. } => PendingReason::Deleting,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { ordinal } => write!(f, "create {ordinal}"),
            Action::Update { ordinal } => write!(f, "update {ordinal}"),
            Action::Delete { ordinal } => write!(f, "delete {ordinal}"),
        }
    }
}

/// An ordinal that prevents progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocker {
    pub ordinal: u32,
    pub reason: PendingReason,
}

impl Blocker {
    pub fn for_replica(view: &ReplicaView) -> Self {
        let reason = match view.state {
            ReplicaState::Creating => PendingReason::Creating,
            ReplicaState::Updating => PendingReason::Updating,
            ReplicaState::Deleting => PendingReason::Deleting,
            ReplicaState::Error => PendingReason::ReplicaError,
            ReplicaState::Pending | ReplicaState::Ready => PendingReason::NotReady,
        };
        Self {
            ordinal: view.ordinal,
            reason,
        }
    }
}

/// Outcome of planning one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Execute this action.
    Execute(Action),
    /// Work remains but is blocked on a replica.
    Wait(Blocker),
    /// Nothing to do.
    Idle,
}

impl Step {
    pub fn is_idle(&self) -> bool {
        matches!(self, Step::Idle)
    }
}

// =============================================================================
// Ordinal Policy
// =============================================================================

/// How scale-out waits between ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrdinalPolicy {
    /// Ordinal `i + 1` is created only once `i` is available; deletions wait
    /// for the previous ordinal to be gone.
    #[default]
    OrderedReady,
    /// Missing ordinals are created without waiting on lower ones.
    Parallel,
}

impl FromStr for OrdinalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orderedready" | "ordered_ready" | "ordered" => Ok(OrdinalPolicy::OrderedReady),
            "parallel" => Ok(OrdinalPolicy::Parallel),
            other => Err(format!("unknown ordinal policy: {other}")),
        }
    }
}

// =============================================================================
// Scale Plan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScalePlan {
    /// Missing ordinals below the desired count, ascending.
    pub to_create: Vec<u32>,
    /// Existing ordinals at or above the desired count, descending.
    pub to_delete: Vec<u32>,
}

impl ScalePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the ordinals to create and delete to reach `desired` replicas.
pub fn plan(desired: u32, existing: &BTreeSet<u32>) -> ScalePlan {
    let to_create = (0..desired).filter(|o| !existing.contains(o)).collect();
    let to_delete = existing.range(desired..).rev().copied().collect();
    ScalePlan {
        to_create,
        to_delete,
    }
}

/// Pick the one scale action for this pass.
///
/// Deletions of out-of-range ordinals come before any creation.
pub fn next_scale_step(
    plan: &ScalePlan,
    replicas: &BTreeMap<u32, ReplicaView>,
    policy: OrdinalPolicy,
    pacing: &Pacing,
) -> Step {
    if !plan.to_delete.is_empty() {
        let deleting = plan
            .to_delete
            .iter()
            .filter_map(|o| replicas.get(o))
            .find(|r| r.state == ReplicaState::Deleting);

        if let (OrdinalPolicy::OrderedReady, Some(view)) = (policy, deleting) {
            return Step::Wait(Blocker::for_replica(view));
        }

        let next = plan.to_delete.iter().copied().find(|o| {
            replicas
                .get(o)
                .is_none_or(|r| r.state != ReplicaState::Deleting)
        });
        return match (next, deleting) {
            (Some(ordinal), _) => Step::Execute(Action::Delete { ordinal }),
            (None, Some(view)) => Step::Wait(Blocker::for_replica(view)),
            (None, None) => Step::Idle,
        };
    }

    let Some(&ordinal) = plan.to_create.first() else {
        return Step::Idle;
    };

    if policy == OrdinalPolicy::OrderedReady {
        if let Some(blocker) = replicas
            .range(..ordinal)
            .map(|(_, view)| view)
            .find(|view| !view.is_available(pacing))
        {
            return Step::Wait(Blocker::for_replica(blocker));
        }
    }

    Step::Execute(Action::Create { ordinal })
}
