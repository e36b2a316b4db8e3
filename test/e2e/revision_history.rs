//! Revision history retention.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p seedfleet-e2e --test revision_history
//! ```

use seedfleet_events::Reason;
use seedfleet_id::RevisionName;
use seedfleet_reconcile::RevisionBackend;
use seedfleet_testing::{spec, Harness};

async fn revision_names(h: &Harness) -> Vec<RevisionName> {
    let mut revisions = h.revisions.list_revisions(&h.key).await.unwrap();
    revisions.sort_by_key(|r| r.number);
    revisions.into_iter().map(|r| r.name).collect()
}

#[tokio::test]
async fn history_limit_keeps_newest_revisions_including_current() {
    let h = Harness::new();
    let mut currents = Vec::new();

    for version in ["1.28", "1.29", "1.30", "1.31"] {
        h.apply(spec(version).replicas(1).history_limit(2).build())
            .await;
        let fleet = h.converge().await;
        currents.push(fleet.status.update_revision.clone().unwrap());
    }

    let names = revision_names(&h).await;
    assert_eq!(names, currents[2..].to_vec());

    let fleet = h.fleet().await;
    assert_eq!(fleet.status.current_revision.as_ref(), currents.last());
    assert!(h.reasons().contains(&Reason::RevisionsPruned));
}

#[tokio::test]
async fn revisions_in_use_survive_a_tight_limit() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(2).partition(1).history_limit(1).build())
        .await;
    h.converge().await;
    h.apply(spec("1.31").replicas(2).partition(1).history_limit(1).build())
        .await;
    let fleet = h.converge().await;

    // ordinal 0 still runs the old revision, so it cannot be pruned
    assert_eq!(h.revisions.count(&h.key).await, 2);
    let names = revision_names(&h).await;
    assert_eq!(h.revision_of(0).await.as_ref(), names.first());
    assert_eq!(fleet.status.update_revision.as_ref(), names.last());
    assert!(!h.reasons().contains(&Reason::RevisionsPruned));
}

#[tokio::test]
async fn zero_limit_keeps_only_live_revisions() {
    let h = Harness::new();
    h.apply(spec("1.30").replicas(1).history_limit(0).build())
        .await;
    h.converge().await;
    h.apply(spec("1.31").replicas(1).history_limit(0).build())
        .await;
    let fleet = h.converge().await;

    // the old revision is released once status records the new current
    h.pass().await;

    assert_eq!(
        revision_names(&h).await,
        vec![fleet.status.update_revision.unwrap()]
    );
}
