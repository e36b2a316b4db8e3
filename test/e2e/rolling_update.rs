//! Rolling updates, partitions and the OnDelete strategy.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p seedfleet-e2e --test rolling_update
//! ```

use seedfleet_events::Reason;
use seedfleet_reconcile::{Action, FleetPhase, PassOutcome, ReplicaState};
use seedfleet_testing::{spec, Harness};

fn executed(outcome: &PassOutcome) -> Option<Action> {
    match outcome {
        PassOutcome::Reconciled { executed, .. } => *executed,
        _ => None,
    }
}

#[tokio::test]
async fn partitioned_update_goes_highest_first_and_stops_at_partition() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(5).partition(2).build()).await;
    let before = h.converge().await;
    let old = before.status.update_revision.clone().unwrap();

    h.apply(spec("1.31").replicas(5).partition(2).build()).await;

    for ordinal in [4, 3, 2] {
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), Some(Action::Update { ordinal }));
        assert!(matches!(
            outcome,
            PassOutcome::Reconciled {
                phase: FleetPhase::RollingUpdate,
                ..
            }
        ));

        // the next lower ordinal waits for this one to become ready
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), None);
        assert_eq!(h.state_of(ordinal).await, Some(ReplicaState::Updating));

        h.replicas.tick().await;
    }

    let fleet = h.converge().await;
    let new = fleet.status.update_revision.clone().unwrap();
    assert_ne!(old, new);

    assert_eq!(h.revision_of(0).await, Some(old.clone()));
    assert_eq!(h.revision_of(1).await, Some(old.clone()));
    for ordinal in 2..5 {
        assert_eq!(h.revision_of(ordinal).await, Some(new.clone()));
    }
    assert_eq!(h.ordinals_with(Reason::SuccessfulUpdate), vec![4, 3, 2]);

    // the rollout is incomplete, so the old revision stays current
    assert_eq!(fleet.status.updated_replicas, 3);
    assert_eq!(fleet.status.current_revision, Some(old));
    assert_eq!(fleet.status.current_replicas, 2);
}

#[tokio::test]
async fn lowering_partition_completes_rollout() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(3).partition(1).build()).await;
    h.converge().await;
    h.apply(spec("1.31").replicas(3).partition(1).build()).await;
    h.converge().await;

    h.apply(spec("1.31").replicas(3).partition(0).build()).await;
    let fleet = h.converge().await;

    assert_eq!(h.ordinals_with(Reason::SuccessfulUpdate), vec![2, 1, 0]);
    assert_eq!(fleet.status.updated_replicas, 3);
    assert_eq!(fleet.status.current_replicas, 3);
    assert_eq!(fleet.status.current_revision, fleet.status.update_revision);
}

#[tokio::test]
async fn new_ordinal_below_partition_uses_update_revision() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).partition(5).build()).await;
    let before = h.converge().await;
    let old = before.status.update_revision.clone().unwrap();

    h.apply(spec("1.31").replicas(4).partition(5).build()).await;
    let fleet = h.converge().await;
    let new = fleet.status.update_revision.clone().unwrap();

    // existing ordinals are below the partition and keep their revision
    assert_eq!(h.revision_of(0).await, Some(old.clone()));
    assert_eq!(h.revision_of(1).await, Some(old));
    // new ordinals are created from the update revision
    assert_eq!(h.revision_of(2).await, Some(new.clone()));
    assert_eq!(h.revision_of(3).await, Some(new));
    assert!(h.ordinals_with(Reason::SuccessfulUpdate).is_empty());
}

#[tokio::test]
async fn on_delete_only_replaces_removed_replicas() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(3).build()).await;
    let before = h.converge().await;
    let old = before.status.update_revision.clone().unwrap();

    h.apply(spec("1.31").replicas(3).on_delete().build()).await;
    let fleet = h.converge().await;
    let new = fleet.status.update_revision.clone().unwrap();

    for ordinal in 0..3 {
        assert_eq!(h.revision_of(ordinal).await, Some(old.clone()));
    }
    assert!(h.ordinals_with(Reason::SuccessfulUpdate).is_empty());

    // an external delete is how OnDelete replicas pick up the new template
    h.replicas.remove(&h.key.replica(1)).await;
    h.converge().await;

    assert_eq!(h.revision_of(0).await, Some(old.clone()));
    assert_eq!(h.revision_of(1).await, Some(new));
    assert_eq!(h.revision_of(2).await, Some(old));
}

#[tokio::test]
async fn reverting_template_reuses_previous_revision() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).build()).await;
    let first = h.converge().await;

    h.apply(spec("1.31").replicas(2).build()).await;
    h.converge().await;

    h.apply(spec("1.30").replicas(2).build()).await;
    let reverted = h.converge().await;

    assert_eq!(
        reverted.status.update_revision,
        first.status.update_revision
    );
    let created = h
        .reasons()
        .into_iter()
        .filter(|r| *r == Reason::RevisionCreated)
        .count();
    assert_eq!(created, 2);
}
