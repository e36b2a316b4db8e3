//! Notification and event reason definitions.

use std::fmt;
use std::str::FromStr;

use seedfleet_id::{FleetKey, ReplicaKey};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Notifications
// =============================================================================

/// A change notification from the watch layer.
///
/// Notifications are edge triggers only: they carry the key of what changed,
/// and the receiver re-reads current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The fleet object was created or edited.
    FleetChanged { fleet: FleetKey },

    /// An owned replica's observed status changed.
    ReplicaChanged { replica: ReplicaKey },

    /// The fleet object was removed from the store.
    FleetDeleted { fleet: FleetKey },
}

impl Notification {
    /// The fleet whose reconciliation this notification should trigger.
    pub fn fleet(&self) -> &FleetKey {
        match self {
            Notification::FleetChanged { fleet } | Notification::FleetDeleted { fleet } => fleet,
            Notification::ReplicaChanged { replica } => replica.fleet(),
        }
    }
}

// =============================================================================
// Event Severity
// =============================================================================

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    Normal,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "Normal"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

// =============================================================================
// Event Reasons
// =============================================================================

/// Machine-readable reason of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Reason {
    // Replica actions
    SuccessfulCreate,
    FailedCreate,
    SuccessfulUpdate,
    FailedUpdate,
    SuccessfulDelete,
    FailedDelete,

    // Revision history
    RevisionCreated,
    RevisionsPruned,

    // Fleet lifecycle
    InvariantViolation,
    FleetCleanedUp,
}

impl Reason {
    /// All reasons, in declaration order.
    pub const ALL: [Reason; 10] = [
        Reason::SuccessfulCreate,
        Reason::FailedCreate,
        Reason::SuccessfulUpdate,
        Reason::FailedUpdate,
        Reason::SuccessfulDelete,
        Reason::FailedDelete,
        Reason::RevisionCreated,
        Reason::RevisionsPruned,
        Reason::InvariantViolation,
        Reason::FleetCleanedUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::SuccessfulCreate => "SuccessfulCreate",
            Reason::FailedCreate => "FailedCreate",
            Reason::SuccessfulUpdate => "SuccessfulUpdate",
            Reason::FailedUpdate => "FailedUpdate",
            Reason::SuccessfulDelete => "SuccessfulDelete",
            Reason::FailedDelete => "FailedDelete",
            Reason::RevisionCreated => "RevisionCreated",
            Reason::RevisionsPruned => "RevisionsPruned",
            Reason::InvariantViolation => "InvariantViolation",
            Reason::FleetCleanedUp => "FleetCleanedUp",
        }
    }

    /// Failures and invariant violations are warnings; everything else is
    /// normal progress.
    pub fn severity(&self) -> Severity {
        match self {
            Reason::FailedCreate
            | Reason::FailedUpdate
            | Reason::FailedDelete
            | Reason::InvariantViolation => Severity::Warning,
            _ => Severity::Normal,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reason {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reason::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| EventError::UnknownReason(s.to_string()))
    }
}

impl TryFrom<String> for Reason {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reason> for String {
    fn from(reason: Reason) -> Self {
        reason.as_str().to_string()
    }
}
