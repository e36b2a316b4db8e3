//! Ordered scale-out and scale-in.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p seedfleet-e2e --test ordered_scaling
//! ```

use seedfleet_events::Reason;
use seedfleet_reconcile::{
    Action, OrdinalPolicy, PassOutcome, ReconcilerConfig, ReplicaState,
};
use seedfleet_testing::{spec, test_config, Harness};

fn executed(outcome: &PassOutcome) -> Option<Action> {
    match outcome {
        PassOutcome::Reconciled { executed, .. } => *executed,
        _ => None,
    }
}

#[tokio::test]
async fn scale_out_creates_ordinals_one_at_a_time() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(3).build()).await;

    for ordinal in 0..3 {
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), Some(Action::Create { ordinal }));

        // nothing else happens while the new replica is still creating
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), None);
        assert_eq!(h.state_of(ordinal).await, Some(ReplicaState::Creating));
        assert_eq!(h.ordinals().await, (0..=ordinal).collect::<Vec<_>>());

        h.replicas.tick().await;
    }

    let fleet = h.converge().await;
    assert_eq!(fleet.status.replicas, 3);
    assert_eq!(fleet.status.ready_replicas, 3);
    assert_eq!(h.ordinals_with(Reason::SuccessfulCreate), vec![0, 1, 2]);
}

#[tokio::test]
async fn scale_in_deletes_highest_first_and_waits_for_gone() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(5).build()).await;
    h.converge().await;

    h.apply(spec("1.30").replicas(2).build()).await;

    for ordinal in [4, 3, 2] {
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), Some(Action::Delete { ordinal }));
        assert_eq!(h.state_of(ordinal).await, Some(ReplicaState::Deleting));

        // the next ordinal waits until this one is gone
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), None);
        assert!(h.state_of(ordinal - 1).await.is_some_and(|s| s == ReplicaState::Ready));

        h.replicas.tick().await;
        assert_eq!(h.state_of(ordinal).await, None);
    }

    let fleet = h.converge().await;
    assert_eq!(h.ordinals().await, vec![0, 1]);
    assert_eq!(fleet.status.replicas, 2);
    assert_eq!(h.ordinals_with(Reason::SuccessfulDelete), vec![4, 3, 2]);
}

#[tokio::test]
async fn scale_out_fills_gaps_in_ascending_order() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(4).build()).await;
    h.converge().await;

    h.replicas.remove(&h.key.replica(1)).await;
    h.replicas.remove(&h.key.replica(2)).await;

    let outcome = h.pass().await;
    assert_eq!(executed(&outcome), Some(Action::Create { ordinal: 1 }));

    h.converge().await;
    assert_eq!(h.ordinals().await, vec![0, 1, 2, 3]);
    assert_eq!(h.ordinals_with(Reason::SuccessfulCreate), vec![0, 1, 2, 3, 1, 2]);
}

#[tokio::test]
async fn parallel_policy_creates_without_waiting() {
    let h = Harness::with_config(ReconcilerConfig {
        ordinal_policy: OrdinalPolicy::Parallel,
        ..test_config()
    });
    h.apply(spec("1.30").replicas(3).build()).await;

    // still one action per pass, but no waiting on readiness
    for ordinal in 0..3 {
        let outcome = h.pass().await;
        assert_eq!(executed(&outcome), Some(Action::Create { ordinal }));
    }
    assert_eq!(h.ordinals().await, vec![0, 1, 2]);

    let fleet = h.converge().await;
    assert_eq!(fleet.status.ready_replicas, 3);
}

#[tokio::test]
async fn scale_to_zero_removes_every_replica() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).build()).await;
    h.converge().await;

    h.apply(spec("1.30").replicas(0).build()).await;
    let fleet = h.converge().await;

    assert!(h.ordinals().await.is_empty());
    assert_eq!(fleet.status.replicas, 0);
    assert_eq!(h.ordinals_with(Reason::SuccessfulDelete), vec![1, 0]);
}
