//! Seed fleet reconciliation.
//!
//! This library drives a fleet of seed replicas toward the desired state
//! recorded in its spec. Key concepts:
//!
//! - **Revision**: an immutable snapshot of the replica template, named by
//!   the hash of its canonical form.
//! - **Ordinal**: the stable position of a replica within its fleet. Replica
//!   `n` of fleet `seeds` is named `seeds-n`.
//! - **Pass**: one run of [`FleetReconciler::reconcile`]. A pass observes,
//!   plans and issues at most one mutating replica operation, then writes
//!   status.
//!
//! # Invariants
//!
//! - Passes are idempotent: an unchanged world produces no writes
//! - Decisions are deterministic given the same observations
//! - Replicas are created in ascending and deleted in descending ordinal
//!   order; rolling updates proceed from the highest ordinal down
//! - A fleet is never touched by two passes at once

pub mod backoff;
pub mod client;
pub mod controller;
mod error;
pub mod hash;
pub mod health;
pub mod memory;
pub mod model;
pub mod planner;
pub mod queue;
pub mod reconciler;
pub mod revision;
pub mod status;
pub mod update;

pub use backoff::{BackoffPolicy, RetryTracker};
pub use client::{EventSink, FleetStore, ReplicaClient, RevisionBackend, TracingEventSink};
pub use controller::{ControllerOptions, FleetController};
pub use error::{
    InvariantViolation, ReconcileError, ReconcileResult, ReplicaError, StoreError,
};
pub use health::{ObservedReplica, RawReplicaStatus, ReplicaState, ReplicaView};
pub use model::{
    Fleet, FleetPhase, FleetSpec, FleetStatus, ReplicaTemplate, ResourceVersion, Revision,
    UpdateStrategy,
};
pub use planner::{Action, OrdinalPolicy, Step};
pub use queue::WorkQueue;
pub use reconciler::{FleetReconciler, PassOutcome, ReconcilerConfig};
