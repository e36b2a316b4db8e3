//! Seed fleet controller service.
//!
//! Runs the fleet controller against the in-memory fleet store and the
//! simulated replica collaborator, seeded from a directory of manifests.

pub mod config;
pub mod manifest;

use std::sync::Arc;
use std::time::Duration;

use seedfleet_reconcile::memory::{MemoryFleetStore, SimulatedReplicaClient};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::manifest::Manifest;

/// Write every manifest's spec into `store`.
pub async fn seed(store: &MemoryFleetStore, manifests: &[Manifest]) {
    for manifest in manifests {
        let fleet = store.put_spec(&manifest.key, manifest.spec.clone()).await;
        info!(
            fleet = %manifest.key,
            generation = fleet.generation,
            path = %manifest.path.display(),
            "Fleet loaded"
        );
    }
}

/// Advance simulated replicas every `tick` until shutdown.
#[instrument(skip(replicas, shutdown))]
pub async fn run_simulation(
    replicas: Arc<SimulatedReplicaClient>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting replica simulation");
    let mut interval = tokio::time::interval(tick);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let changed = replicas.tick().await;
                if !changed.is_empty() {
                    debug!(count = changed.len(), "simulated replicas progressed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Replica simulation shutting down");
                    break;
                }
            }
        }
    }
}
