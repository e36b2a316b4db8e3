//! Rolling update engine.

use std::collections::BTreeMap;

use seedfleet_id::RevisionName;

use crate::health::{Pacing, ReplicaView};
use crate::model::EffectiveStrategy;
use crate::planner::{Action, Blocker, Step};

/// Ordinals that still need `update_revision`, highest first.
///
/// Only ordinals at or above `partition` are eligible; replicas already on
/// the update revision are skipped.
pub fn plan_update(
    partition: u32,
    replicas: &BTreeMap<u32, ReplicaView>,
    update_revision: &RevisionName,
) -> Vec<u32> {
    replicas
        .range(partition..)
        .rev()
        .filter(|(_, view)| &view.revision != update_revision)
        .map(|(ordinal, _)| *ordinal)
        .collect()
}

/// Pick the one update action for this pass.
///
/// Ordinal `i` is only touched once every eligible ordinal above it is on
/// the update revision and available. `OnDelete` never updates.
pub fn next_update_step(
    strategy: EffectiveStrategy,
    replicas: &BTreeMap<u32, ReplicaView>,
    update_revision: &RevisionName,
    pacing: &Pacing,
) -> Step {
    let EffectiveStrategy::RollingUpdate { partition } = strategy else {
        return Step::Idle;
    };

    let candidates = plan_update(partition, replicas, update_revision);
    let Some(&ordinal) = candidates.first() else {
        return Step::Idle;
    };

    // Everything above the candidate is already on the update revision.
    if let Some((_, above)) = replicas
        .range(ordinal.saturating_add(1)..)
        .rev()
        .find(|(_, view)| !view.is_available(pacing))
    {
        return Step::Wait(Blocker::for_replica(above));
    }

    if let Some(view) = replicas.get(&ordinal) {
        if view.state.is_in_flight() {
            return Step::Wait(Blocker::for_replica(view));
        }
    }

    Step::Execute(Action::Update { ordinal })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ReplicaState;
    use crate::model::{PendingReason, ResourceVersion};
    use chrono::Utc;
    use proptest::prelude::*;

    const OLD: &str = "seeds-0000000001";
    const NEW: &str = "seeds-0000000002";

    fn view(ordinal: u32, revision: &str, state: ReplicaState) -> ReplicaView {
        ReplicaView {
            ordinal,
            revision: RevisionName::new(revision),
            state,
            ready_since: (state == ReplicaState::Ready).then(Utc::now),
            resource_version: ResourceVersion::new(1),
        }
    }

    fn fleet(specs: &[(&str, ReplicaState)]) -> BTreeMap<u32, ReplicaView> {
        specs
            .iter()
            .enumerate()
            .map(|(i, &(rev, state))| (i as u32, view(i as u32, rev, state)))
            .collect()
    }

    fn new_rev() -> RevisionName {
        RevisionName::new(NEW)
    }

    #[test]
    fn test_plan_update_respects_partition() {
        let replicas = fleet(&[(OLD, ReplicaState::Ready); 5]);
        assert_eq!(plan_update(2, &replicas, &new_rev()), vec![4, 3, 2]);
        assert!(plan_update(5, &replicas, &new_rev()).is_empty());
    }

    #[test]
    fn test_plan_update_skips_current() {
        let replicas = fleet(&[
            (OLD, ReplicaState::Ready),
            (NEW, ReplicaState::Ready),
            (OLD, ReplicaState::Ready),
        ]);
        assert_eq!(plan_update(0, &replicas, &new_rev()), vec![2, 0]);
    }

    #[test]
    fn test_update_highest_first() {
        let replicas = fleet(&[(OLD, ReplicaState::Ready); 5]);
        let step = next_update_step(
            EffectiveStrategy::RollingUpdate { partition: 2 },
            &replicas,
            &new_rev(),
            &Pacing::immediate(Utc::now()),
        );
        assert_eq!(step, Step::Execute(Action::Update { ordinal: 4 }));
    }

    #[test]
    fn test_update_waits_for_higher_ordinal() {
        let replicas = fleet(&[
            (OLD, ReplicaState::Ready),
            (OLD, ReplicaState::Ready),
            (OLD, ReplicaState::Ready),
            (OLD, ReplicaState::Ready),
            (NEW, ReplicaState::Updating),
        ]);
        let step = next_update_step(
            EffectiveStrategy::RollingUpdate { partition: 2 },
            &replicas,
            &new_rev(),
            &Pacing::immediate(Utc::now()),
        );
        assert_eq!(
            step,
            Step::Wait(Blocker {
                ordinal: 4,
                reason: PendingReason::Updating
            })
        );
    }

    #[test]
    fn test_update_waits_while_candidate_is_creating() {
        let replicas = fleet(&[(OLD, ReplicaState::Ready), (OLD, ReplicaState::Creating)]);
        let step = next_update_step(
            EffectiveStrategy::RollingUpdate { partition: 0 },
            &replicas,
            &new_rev(),
            &Pacing::immediate(Utc::now()),
        );
        assert_eq!(
            step,
            Step::Wait(Blocker {
                ordinal: 1,
                reason: PendingReason::Creating
            })
        );
    }

    #[test]
    fn test_update_replaces_errored_replica() {
        let replicas = fleet(&[(OLD, ReplicaState::Error)]);
        let step = next_update_step(
            EffectiveStrategy::RollingUpdate { partition: 0 },
            &replicas,
            &new_rev(),
            &Pacing::immediate(Utc::now()),
        );
        assert_eq!(step, Step::Execute(Action::Update { ordinal: 0 }));
    }

    #[test]
    fn test_on_delete_never_updates() {
        let replicas = fleet(&[(OLD, ReplicaState::Ready); 3]);
        let step = next_update_step(
            EffectiveStrategy::OnDelete,
            &replicas,
            &new_rev(),
            &Pacing::immediate(Utc::now()),
        );
        assert!(step.is_idle());
    }

    fn arb_replicas() -> impl Strategy<Value = BTreeMap<u32, ReplicaView>> {
        proptest::collection::vec(any::<bool>(), 0..24).prop_map(|on_new| {
            on_new
                .into_iter()
                .enumerate()
                .map(|(i, is_new)| {
                    let rev = if is_new { NEW } else { OLD };
                    (i as u32, view(i as u32, rev, ReplicaState::Ready))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_plan_update_never_below_partition(
            replicas in arb_replicas(),
            partition in 0u32..30,
        ) {
            let planned = plan_update(partition, &replicas, &new_rev());
            prop_assert!(planned.iter().all(|o| *o >= partition));
            prop_assert!(planned.windows(2).all(|w| w[0] > w[1]));
            prop_assert!(planned.iter().all(|o| replicas[o].revision != new_rev()));
        }
    }
}
