//! Idempotent passes, fleet deletion and the controller loop.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p seedfleet-e2e --test fleet_lifecycle
//! ```

use std::sync::Arc;
use std::time::Duration;

use seedfleet_events::Reason;
use seedfleet_id::FleetKey;
use seedfleet_reconcile::memory::{
    MemoryEventSink, MemoryFleetStore, MemoryRevisionBackend, SimulatedReplicaClient,
};
use seedfleet_reconcile::model::ConditionType;
use seedfleet_reconcile::{
    ControllerOptions, FleetController, FleetReconciler, PassOutcome,
};
use seedfleet_testing::{spec, test_config, Harness};
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn converged_fleet_passes_are_no_ops() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(3).build()).await;
    let converged = h.converge().await;
    let calls = h.replicas.calls().await.len();
    let events = h.events().len();

    for _ in 0..3 {
        let outcome = h.pass().await;
        assert!(matches!(
            outcome,
            PassOutcome::Reconciled {
                executed: None,
                requeue_after: None,
                ..
            }
        ));
    }

    let fleet = h.fleet().await;
    assert_eq!(h.replicas.calls().await.len(), calls);
    assert_eq!(h.events().len(), events);
    // unchanged status is not rewritten
    assert_eq!(fleet.resource_version, converged.resource_version);

    let ready = fleet.status.condition(ConditionType::ReplicasReady).unwrap();
    assert!(ready.status);
    let progressing = fleet.status.condition(ConditionType::Progressing).unwrap();
    assert!(!progressing.status);
}

#[tokio::test]
async fn deleted_fleet_is_cleaned_up() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(3).build()).await;
    h.converge().await;
    assert!(h.store.delete(&h.key).await);

    let outcome = h.pass().await;
    let PassOutcome::CleanedUp {
        replicas_deleted,
        replicas_remaining,
        ..
    } = outcome
    else {
        panic!("expected cleanup, got {outcome:?}");
    };
    assert_eq!(replicas_deleted, 3);
    assert_eq!(replicas_remaining, 3);
    assert!(outcome.requeue_after().is_some());
    assert_eq!(h.ordinals_with(Reason::SuccessfulDelete), vec![2, 1, 0]);

    h.replicas.tick().await;
    let outcome = h.pass().await;
    assert!(matches!(
        outcome,
        PassOutcome::CleanedUp {
            replicas_remaining: 0,
            requeue_after: None,
            ..
        }
    ));
    assert!(h.ordinals().await.is_empty());
    assert_eq!(h.revisions.count(&h.key).await, 0);
    assert!(h.reasons().contains(&Reason::FleetCleanedUp));
}

#[tokio::test]
async fn unknown_fleet_pass_is_harmless() {
    let h = Harness::new();
    let outcome = h.pass().await;
    assert_eq!(
        outcome,
        PassOutcome::CleanedUp {
            replicas_deleted: 0,
            revisions_deleted: 0,
            replicas_remaining: 0,
            requeue_after: None,
        }
    );
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn controller_converges_many_fleets() {
    let (tx, rx) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryFleetStore::new().with_notifications(tx.clone()));
    let replicas = Arc::new(SimulatedReplicaClient::new().with_notifications(tx));
    let events = Arc::new(MemoryEventSink::new());
    let reconciler = FleetReconciler::new(
        store.clone(),
        Arc::new(MemoryRevisionBackend::new()),
        replicas.clone(),
        events.clone(),
        test_config(),
    );
    let controller = Arc::new(FleetController::new(
        reconciler,
        ControllerOptions {
            workers: 3,
            resync_interval: Duration::from_millis(100),
            ..ControllerOptions::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.clone().run(rx, shutdown_rx));

    let keys: Vec<FleetKey> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| FleetKey::new("garden", name).unwrap())
        .collect();
    for (i, key) in keys.iter().enumerate() {
        store
            .put_spec(key, spec("1.30").replicas(i as i32 + 1).build())
            .await;
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            replicas.tick().await;
            let mut ready = true;
            for (i, key) in keys.iter().enumerate() {
                let fleet = store.fleet(key).await.unwrap();
                ready &= fleet.status.ready_replicas == i as u32 + 1;
            }
            if ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fleets should converge");

    // deleting a fleet through the store is picked up from the notification
    assert!(store.delete(&keys[2]).await);
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            replicas.tick().await;
            if replicas.ordinals(&keys[2]).await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deleted fleet should be cleaned up");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let creates = events
        .events()
        .iter()
        .filter(|e| e.reason == Reason::SuccessfulCreate)
        .count();
    assert_eq!(creates, 1 + 2 + 3);
}
