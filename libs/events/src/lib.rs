//! # seedfleet-events
//!
//! Inbound change notifications and outbound recorded events for the fleet
//! controller.
//!
//! ## Design Principles
//!
//! - Notifications only name *what* changed (a fleet key or a replica key);
//!   the reconciler always re-reads the object store, never trusts payloads
//! - Recorded events are immutable once built
//! - Every recorded event belongs to exactly one fleet and, when it concerns a
//!   single replica, carries that replica's ordinal
//!
//! ## Notifications
//!
//! - `FleetChanged`: spec edited, status edited, fleet created
//! - `ReplicaChanged`: any owned replica's observed status changed
//! - `FleetDeleted`: fleet removed from the store
//!
//! ## Recorded Events
//!
//! Grouped by reason:
//! - Replica actions (`SuccessfulCreate`, `FailedUpdate`, ...)
//! - Revision history (`RevisionCreated`, `RevisionsPruned`)
//! - Fleet lifecycle (`InvariantViolation`, `FleetCleanedUp`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
