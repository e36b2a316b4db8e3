//! Test fixtures for seed fleets.
//!
//! [`Harness`] wires the in-memory fleet store, revision backend and
//! simulated replica client to a [`FleetReconciler`] for a single fleet, so
//! scenario tests read as a sequence of passes and replica lifecycle steps.

use std::sync::Arc;
use std::time::Duration;

use seedfleet_events::{FleetEvent, Reason};
use seedfleet_id::{FleetKey, RevisionName};
use seedfleet_reconcile::memory::{
    MemoryEventSink, MemoryFleetStore, MemoryRevisionBackend, SimulatedReplicaClient,
};
use seedfleet_reconcile::model::{FleetPhase, UpdateStrategy};
use seedfleet_reconcile::{
    BackoffPolicy, Fleet, FleetReconciler, FleetSpec, PassOutcome, ReconcilerConfig,
    ReplicaTemplate, ReplicaState,
};

/// Upper bound on passes in [`Harness::converge`].
pub const MAX_CONVERGE_PASSES: usize = 200;

// =============================================================================
// Fixtures
// =============================================================================

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn fleet_key() -> FleetKey {
    FleetKey::new("garden", "seeds").expect("valid fleet key")
}

/// A template that differs per `version`.
pub fn template(version: &str) -> ReplicaTemplate {
    ReplicaTemplate::new(serde_json::json!({
        "kubernetes": { "version": version },
        "provider": { "type": "local" },
    }))
}

/// Spec builder with test defaults.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    spec: FleetSpec,
}

impl SpecBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            spec: FleetSpec::new(template(version)),
        }
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.spec.update_strategy = UpdateStrategy::rolling(partition);
        self
    }

    pub fn on_delete(mut self) -> Self {
        self.spec.update_strategy = UpdateStrategy::on_delete();
        self
    }

    pub fn history_limit(mut self, limit: i32) -> Self {
        self.spec.revision_history_limit = limit;
        self
    }

    pub fn build(self) -> FleetSpec {
        self.spec
    }
}

pub fn spec(version: &str) -> SpecBuilder {
    SpecBuilder::new(version)
}

/// Reconciler settings with deterministic backoff.
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        backoff: BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.0,
        },
        progress_requeue: Duration::from_millis(10),
        ..ReconcilerConfig::default()
    }
}

// =============================================================================
// Harness
// =============================================================================

/// One fleet and its in-memory collaborators.
pub struct Harness {
    pub key: FleetKey,
    pub store: Arc<MemoryFleetStore>,
    pub revisions: Arc<MemoryRevisionBackend>,
    pub replicas: Arc<SimulatedReplicaClient>,
    pub events: Arc<MemoryEventSink>,
    pub reconciler: FleetReconciler,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryFleetStore::new());
        let revisions = Arc::new(MemoryRevisionBackend::new());
        let replicas = Arc::new(SimulatedReplicaClient::new());
        let events = Arc::new(MemoryEventSink::new());
        let reconciler = FleetReconciler::new(
            store.clone(),
            revisions.clone(),
            replicas.clone(),
            events.clone(),
            config,
        );
        Self {
            key: fleet_key(),
            store,
            revisions,
            replicas,
            events,
            reconciler,
        }
    }

    /// Write a new spec for the fleet.
    pub async fn apply(&self, spec: FleetSpec) -> Fleet {
        self.store.put_spec(&self.key, spec).await
    }

    /// Run one pass, panicking on error.
    pub async fn pass(&self) -> PassOutcome {
        self.reconciler
            .reconcile(&self.key)
            .await
            .unwrap_or_else(|e| panic!("pass for {} failed: {e}", self.key))
    }

    /// Current fleet record, panicking if it was deleted.
    pub async fn fleet(&self) -> Fleet {
        self.store
            .fleet(&self.key)
            .await
            .unwrap_or_else(|| panic!("fleet {} not found", self.key))
    }

    /// Alternate passes with simulator ticks until a pass is idle on a
    /// settled fleet.
    pub async fn converge(&self) -> Fleet {
        for _ in 0..MAX_CONVERGE_PASSES {
            if let PassOutcome::Reconciled {
                phase: FleetPhase::Normal,
                executed: None,
                requeue_after: None,
            } = self.pass().await
            {
                return self.fleet().await;
            }
            self.replicas.tick().await;
        }
        panic!("fleet {} did not converge", self.key);
    }

    /// Existing ordinals, ascending.
    pub async fn ordinals(&self) -> Vec<u32> {
        self.replicas.ordinals(&self.key).await
    }

    pub async fn revision_of(&self, ordinal: u32) -> Option<RevisionName> {
        self.replicas
            .replica(&self.key.replica(ordinal))
            .await
            .map(|r| r.revision)
    }

    pub async fn state_of(&self, ordinal: u32) -> Option<ReplicaState> {
        self.replicas
            .replica(&self.key.replica(ordinal))
            .await
            .map(|r| seedfleet_reconcile::health::aggregate(&r.status))
    }

    pub fn events(&self) -> Vec<FleetEvent> {
        self.events.events()
    }

    pub fn reasons(&self) -> Vec<Reason> {
        self.events().iter().map(|e| e.reason).collect()
    }

    /// Ordinals of events with `reason`, in recording order.
    pub fn ordinals_with(&self, reason: Reason) -> Vec<u32> {
        self.events()
            .iter()
            .filter(|e| e.reason == reason)
            .filter_map(|e| e.ordinal)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_converges_small_fleet() {
        let h = Harness::new();
        h.apply(spec("1.30").replicas(2).build()).await;

        let fleet = h.converge().await;
        assert_eq!(fleet.status.ready_replicas, 2);
        assert_eq!(h.ordinals().await, vec![0, 1]);
        assert_eq!(h.ordinals_with(Reason::SuccessfulCreate), vec![0, 1]);
    }
}
