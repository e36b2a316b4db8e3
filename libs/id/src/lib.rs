//! # seedfleet-id
//!
//! Identity types for the seedfleet controller.
//!
//! ## Design Principles
//!
//! - Fleet and replica identities are user-visible names; they are validated
//!   once at construction and never re-parsed from free text afterwards
//! - A replica's ordinal is carried explicitly on its key, never inferred from
//!   creation order
//! - Correlation IDs (reconcile passes, recorded events) are ULID-based so they
//!   sort by time
//!
//! ## Name Format
//!
//! - Fleet key: `{namespace}/{name}`, both DNS labels
//! - Replica name: `{fleet-name}-{ordinal}`, e.g. `seeds-0`, `seeds-12`
//! - Revision name: `{fleet-name}-{hash}`, e.g. `seeds-7f3a09c2b1`
//! - Pass ID: `pass_{ulid}`

mod error;
mod keys;
mod macros;
mod types;

pub use error::IdError;
pub use keys::*;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
