//! seedfleet controller
//!
//! Reconciles seed fleets against in-memory collaborators. Fleets are loaded
//! from `SEEDFLEET_MANIFEST_DIR`; replicas are simulated.

use std::sync::Arc;

use anyhow::Result;
use seedfleet_fleet_controller::{config::Config, manifest, run_simulation, seed};
use seedfleet_reconcile::memory::{
    MemoryFleetStore, MemoryRevisionBackend, SimulatedReplicaClient,
};
use seedfleet_reconcile::{FleetController, FleetReconciler, TracingEventSink};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SEEDFLEET_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting seedfleet controller");
    info!(
        workers = config.workers,
        ordinal_policy = ?config.ordinal_policy,
        "Configuration loaded"
    );

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryFleetStore::new().with_notifications(notify_tx.clone()));
    let replicas = Arc::new(SimulatedReplicaClient::new().with_notifications(notify_tx));

    match &config.manifest_dir {
        Some(dir) => {
            let manifests = match manifest::load_dir(dir) {
                Ok(manifests) => manifests,
                Err(e) => {
                    error!(error = %e, "Failed to load fleet manifests");
                    return Err(e.into());
                }
            };
            seed(&store, &manifests).await;
        }
        None => warn!("SEEDFLEET_MANIFEST_DIR not set, starting with no fleets"),
    }

    let reconciler = FleetReconciler::new(
        store,
        Arc::new(MemoryRevisionBackend::new()),
        replicas.clone(),
        Arc::new(TracingEventSink),
        config.reconciler(),
    );
    let controller = Arc::new(FleetController::new(reconciler, config.controller()));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            controller.run(notify_rx, shutdown_rx).await;
        }
    });

    let simulation_handle = tokio::spawn(run_simulation(
        replicas,
        config.simulation_tick,
        shutdown_rx,
    ));

    // Wait for shutdown signal (Ctrl+C)
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    if let Err(e) = controller_handle.await {
        error!(error = %e, "Fleet controller task failed");
    }
    if let Err(e) = simulation_handle.await {
        error!(error = %e, "Replica simulation task failed");
    }

    info!("seedfleet controller stopped");
    Ok(())
}
