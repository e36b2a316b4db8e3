//! ULID-based correlation IDs.

use crate::macros::correlation_id;

correlation_id!(
    /// Identifies one reconciliation pass; attached to every log line and
    /// recorded event the pass produces.
    PassId,
    "pass"
);

correlation_id!(
    /// Identifies one recorded event.
    EventId,
    "evt"
);
