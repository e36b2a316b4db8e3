//! Fleet status derivation.
//!
//! Status is recomputed from scratch on every pass; only the revision
//! bookkeeping and condition transition times are carried over from the
//! previously written status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use seedfleet_id::RevisionName;

use crate::health::{ReplicaState, ReplicaView};
use crate::model::{ConditionType, FleetPhase, FleetStatus, PendingReplica, Revision};

/// Everything a status is derived from.
#[derive(Debug)]
pub struct StatusInput<'a> {
    pub generation: i64,
    pub previous: &'a FleetStatus,
    pub desired_replicas: u32,
    pub replicas: &'a BTreeMap<u32, ReplicaView>,
    pub update_revision: &'a RevisionName,
    pub history: &'a [Revision],
    pub collision_count: u32,
    pub phase: FleetPhase,
    pub pending_replica: Option<PendingReplica>,
    pub now: DateTime<Utc>,
}

/// Derive the fleet status from the observed replicas.
pub fn recompute_status(input: StatusInput<'_>) -> FleetStatus {
    let replicas = input.replicas;
    let existing = replicas.len() as u32;
    let ready = count(replicas, |r| r.state == ReplicaState::Ready);
    let updated = count(replicas, |r| &r.revision == input.update_revision);

    let previous_current = input
        .previous
        .current_revision
        .as_ref()
        .filter(|name| input.history.iter().any(|rev| &rev.name == *name));

    let rollout_complete = updated == input.desired_replicas && existing == input.desired_replicas;
    let current_revision = match previous_current {
        Some(name) if !rollout_complete => name.clone(),
        _ => input.update_revision.clone(),
    };
    let current = count(replicas, |r| r.revision == current_revision);

    let mut status = FleetStatus {
        observed_generation: input.generation,
        replicas: existing,
        ready_replicas: ready,
        current_replicas: current,
        updated_replicas: updated,
        current_revision: Some(current_revision),
        update_revision: Some(input.update_revision.clone()),
        collision_count: input.collision_count,
        phase: input.phase,
        pending_replica: input.pending_replica,
        conditions: input.previous.conditions.clone(),
    };

    let all_ready = ready == input.desired_replicas && existing == input.desired_replicas;
    status.set_condition(
        ConditionType::ReplicasReady,
        all_ready,
        if all_ready {
            "AllReplicasReady"
        } else {
            "ReplicasNotReady"
        },
        format!("{ready}/{} replicas ready", input.desired_replicas),
        input.now,
    );

    let progressing = status.phase != FleetPhase::Normal || status.pending_replica.is_some();
    let message = match &status.pending_replica {
        Some(pending) => format!("waiting on ordinal {} ({:?})", pending.ordinal, pending.reason),
        None => format!("{updated}/{} replicas updated", input.desired_replicas),
    };
    status.set_condition(
        ConditionType::Progressing,
        progressing,
        if progressing {
            status.phase.to_string()
        } else {
            "Converged".to_string()
        },
        message,
        input.now,
    );

    if status.condition(ConditionType::InvariantViolated).is_some() {
        status.set_condition(
            ConditionType::InvariantViolated,
            false,
            "Resolved",
            "",
            input.now,
        );
    }

    status
}

/// Status written when a pass aborts on an invariant violation.
///
/// Counts are left as previously observed; only the generation and the
/// condition move.
pub fn violation_status(
    previous: &FleetStatus,
    generation: i64,
    message: &str,
    now: DateTime<Utc>,
) -> FleetStatus {
    let mut status = previous.clone();
    status.observed_generation = generation;
    status.set_condition(
        ConditionType::InvariantViolated,
        true,
        "InvariantViolation",
        message,
        now,
    );
    status
}

fn count(replicas: &BTreeMap<u32, ReplicaView>, pred: impl Fn(&ReplicaView) -> bool) -> u32 {
    replicas.values().filter(|r| pred(r)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PendingReason, ReplicaTemplate, ResourceVersion};
    use seedfleet_id::FleetKey;

    fn revision(name: &str, number: u64) -> Revision {
        Revision {
            name: RevisionName::new(name),
            fleet: FleetKey::new("garden", "seeds").unwrap(),
            number,
            template_hash: name.rsplit('-').next().unwrap_or_default().to_string(),
            template: ReplicaTemplate::new(serde_json::json!({ "n": number })),
            created_at: Utc::now(),
            is_current: false,
        }
    }

    fn replicas(revs: &[(&str, ReplicaState)]) -> BTreeMap<u32, ReplicaView> {
        revs.iter()
            .enumerate()
            .map(|(i, &(rev, state))| {
                (
                    i as u32,
                    ReplicaView {
                        ordinal: i as u32,
                        revision: RevisionName::new(rev),
                        state,
                        ready_since: None,
                        resource_version: ResourceVersion::new(1),
                    },
                )
            })
            .collect()
    }

    fn input<'a>(
        previous: &'a FleetStatus,
        desired: u32,
        replicas: &'a BTreeMap<u32, ReplicaView>,
        update: &'a RevisionName,
        history: &'a [Revision],
    ) -> StatusInput<'a> {
        StatusInput {
            generation: 2,
            previous,
            desired_replicas: desired,
            replicas,
            update_revision: update,
            history,
            collision_count: 0,
            phase: FleetPhase::Normal,
            pending_replica: None,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_first_status_uses_update_revision() {
        let history = vec![revision("seeds-a", 1)];
        let update = RevisionName::new("seeds-a");
        let current = replicas(&[("seeds-a", ReplicaState::Ready)]);
        let previous = FleetStatus::default();

        let status = recompute_status(input(&previous, 1, &current, &update, &history));

        assert_eq!(status.observed_generation, 2);
        assert_eq!(status.replicas, 1);
        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.current_revision, Some(update.clone()));
        assert_eq!(status.current_replicas, 1);
        assert_eq!(status.updated_replicas, 1);
        assert!(status.condition(ConditionType::ReplicasReady).unwrap().status);
        assert!(!status.condition(ConditionType::Progressing).unwrap().status);
    }

    #[test]
    fn test_current_revision_held_during_rollout() {
        let history = vec![revision("seeds-a", 1), revision("seeds-b", 2)];
        let update = RevisionName::new("seeds-b");
        let current = replicas(&[
            ("seeds-a", ReplicaState::Ready),
            ("seeds-a", ReplicaState::Ready),
            ("seeds-b", ReplicaState::Updating),
        ]);
        let previous = FleetStatus {
            current_revision: Some(RevisionName::new("seeds-a")),
            ..FleetStatus::default()
        };

        let mut inp = input(&previous, 3, &current, &update, &history);
        inp.phase = FleetPhase::RollingUpdate;
        inp.pending_replica = Some(PendingReplica {
            ordinal: 2,
            reason: PendingReason::Updating,
            since: Utc::now(),
            last_attempt: None,
            retries: 0,
            generation: 2,
        });
        let status = recompute_status(inp);

        assert_eq!(status.current_revision, Some(RevisionName::new("seeds-a")));
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.ready_replicas, 2);
        let progressing = status.condition(ConditionType::Progressing).unwrap();
        assert!(progressing.status);
        assert_eq!(progressing.reason, "RollingUpdate");
    }

    #[test]
    fn test_current_revision_advances_when_rollout_completes() {
        let history = vec![revision("seeds-a", 1), revision("seeds-b", 2)];
        let update = RevisionName::new("seeds-b");
        let current = replicas(&[
            ("seeds-b", ReplicaState::Ready),
            ("seeds-b", ReplicaState::Ready),
        ]);
        let previous = FleetStatus {
            current_revision: Some(RevisionName::new("seeds-a")),
            ..FleetStatus::default()
        };

        let status = recompute_status(input(&previous, 2, &current, &update, &history));
        assert_eq!(status.current_revision, Some(update));
        assert_eq!(status.current_replicas, 2);
    }

    #[test]
    fn test_pruned_current_revision_falls_back() {
        let history = vec![revision("seeds-b", 2)];
        let update = RevisionName::new("seeds-b");
        let current = replicas(&[("seeds-a", ReplicaState::Ready)]);
        let previous = FleetStatus {
            current_revision: Some(RevisionName::new("seeds-a")),
            ..FleetStatus::default()
        };

        let status = recompute_status(input(&previous, 1, &current, &update, &history));
        assert_eq!(status.current_revision, Some(update));
        assert_eq!(status.current_replicas, 0);
    }

    #[test]
    fn test_violation_is_recorded_then_cleared() {
        let now = Utc::now();
        let previous = FleetStatus {
            replicas: 3,
            ..FleetStatus::default()
        };
        let violated = violation_status(&previous, 4, "spec.replicas must be non-negative", now);
        assert_eq!(violated.observed_generation, 4);
        assert_eq!(violated.replicas, 3);
        let cond = violated.condition(ConditionType::InvariantViolated).unwrap();
        assert!(cond.status);

        let history = vec![revision("seeds-a", 1)];
        let update = RevisionName::new("seeds-a");
        let current = replicas(&[]);
        let status = recompute_status(input(&violated, 0, &current, &update, &history));
        assert!(!status.condition(ConditionType::InvariantViolated).unwrap().status);
    }
}
