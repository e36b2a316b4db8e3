//! Failed replica operations, errored replicas and invalid specs.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p seedfleet-e2e --test failure_recovery
//! ```

use std::time::Duration;

use seedfleet_events::Reason;
use seedfleet_reconcile::memory::ReplicaOp;
use seedfleet_reconcile::model::{ConditionType, PendingReason};
use seedfleet_reconcile::{Action, BackoffPolicy, PassOutcome, ReconcilerConfig, ReplicaState};
use seedfleet_testing::{spec, test_config, Harness};

fn executed(outcome: &PassOutcome) -> Option<Action> {
    match outcome {
        PassOutcome::Reconciled { executed, .. } => *executed,
        _ => None,
    }
}

#[tokio::test]
async fn failed_create_is_retried_after_backoff() {
    let h = Harness::with_config(ReconcilerConfig {
        backoff: BackoffPolicy {
            base: Duration::from_millis(50),
            max: Duration::from_secs(1),
            jitter: 0.0,
        },
        ..test_config()
    });
    h.apply(spec("1.30").replicas(1).build()).await;
    h.replicas.fail_next(ReplicaOp::Create, 2).await;

    // first failure
    let outcome = h.pass().await;
    assert_eq!(executed(&outcome), None);
    assert_eq!(outcome.requeue_after(), Some(Duration::from_millis(50)));
    let pending = h.fleet().await.status.pending_replica.unwrap();
    assert_eq!(pending.reason, PendingReason::CreateFailed);
    assert_eq!(pending.retries, 1);

    // inside the backoff window nothing is attempted
    h.pass().await;
    assert_eq!(h.ordinals_with(Reason::FailedCreate), vec![0]);

    // second failure doubles the delay
    tokio::time::sleep(Duration::from_millis(80)).await;
    let outcome = h.pass().await;
    assert_eq!(outcome.requeue_after(), Some(Duration::from_millis(100)));
    assert_eq!(h.fleet().await.status.pending_replica.unwrap().retries, 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let outcome = h.pass().await;
    assert_eq!(executed(&outcome), Some(Action::Create { ordinal: 0 }));

    let fleet = h.converge().await;
    assert_eq!(fleet.status.ready_replicas, 1);
    assert_eq!(fleet.status.pending_replica, None);
    assert_eq!(h.ordinals_with(Reason::FailedCreate), vec![0, 0]);
}

#[tokio::test]
async fn errored_replica_blocks_scale_out_until_repaired() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).build()).await;
    h.converge().await;
    h.replicas
        .mark_error(&h.key.replica(1), "control plane unreachable")
        .await;

    h.apply(spec("1.30").replicas(3).build()).await;
    let outcome = h.pass().await;
    assert_eq!(executed(&outcome), None);
    let pending = h.fleet().await.status.pending_replica.unwrap();
    assert_eq!(pending.ordinal, 1);
    assert_eq!(pending.reason, PendingReason::ReplicaError);
    assert_eq!(h.ordinals().await, vec![0, 1]);
}

#[tokio::test]
async fn rollout_replaces_errored_replica() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).build()).await;
    h.converge().await;
    h.replicas
        .mark_error(&h.key.replica(1), "etcd quorum lost")
        .await;
    assert_eq!(h.state_of(1).await, Some(ReplicaState::Error));

    h.apply(spec("1.31").replicas(2).build()).await;
    let outcome = h.pass().await;
    assert_eq!(executed(&outcome), Some(Action::Update { ordinal: 1 }));

    let fleet = h.converge().await;
    assert_eq!(h.state_of(1).await, Some(ReplicaState::Ready));
    assert_eq!(fleet.status.updated_replicas, 2);
}

#[tokio::test]
async fn invalid_spec_is_reported_and_recovers() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(-3).build()).await;

    let outcome = h.pass().await;
    assert!(matches!(outcome, PassOutcome::Violated { .. }));
    assert_eq!(outcome.requeue_after(), None);
    assert!(h.ordinals().await.is_empty());
    assert_eq!(h.revisions.count(&h.key).await, 0);

    let fleet = h.fleet().await;
    let violated = fleet
        .status
        .condition(ConditionType::InvariantViolated)
        .unwrap();
    assert!(violated.status);
    assert!(violated.message.contains("replicas"));

    h.apply(spec("1.30").replicas(1).build()).await;
    let fleet = h.converge().await;
    let violated = fleet
        .status
        .condition(ConditionType::InvariantViolated)
        .unwrap();
    assert!(!violated.status);
    assert_eq!(fleet.status.ready_replicas, 1);
}

#[tokio::test]
async fn status_conflicts_are_absorbed() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).build()).await;
    h.store.inject_status_conflicts(3).await;

    let fleet = h.converge().await;
    assert_eq!(fleet.status.ready_replicas, 2);
    assert_eq!(fleet.status.observed_generation, fleet.generation);
}
