//! Recorded event envelope.

use chrono::{DateTime, Utc};
use seedfleet_id::{EventId, FleetKey, PassId, RevisionName};
use serde::{Deserialize, Serialize};

use crate::{EventError, Reason, Severity};

/// A recorded fleet lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    /// Unique, time-ordered event identifier.
    pub event_id: EventId,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The fleet this event belongs to.
    pub fleet: FleetKey,

    /// Ordinal of the replica concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,

    /// Revision concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionName>,

    /// The reconcile pass that produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_id: Option<PassId>,

    pub severity: Severity,

    pub reason: Reason,

    /// Human-readable message.
    pub message: String,
}

impl FleetEvent {
    /// Creates a new event builder.
    pub fn builder() -> FleetEventBuilder {
        FleetEventBuilder::new()
    }
}

/// Builder for constructing recorded events.
#[derive(Debug, Default)]
pub struct FleetEventBuilder {
    occurred_at: Option<DateTime<Utc>>,
    fleet: Option<FleetKey>,
    ordinal: Option<u32>,
    revision: Option<RevisionName>,
    pass_id: Option<PassId>,
    reason: Option<Reason>,
    message: Option<String>,
}

impl FleetEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    pub fn fleet(mut self, fleet: FleetKey) -> Self {
        self.fleet = Some(fleet);
        self
    }

    pub fn ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self
    }

    pub fn revision(mut self, revision: RevisionName) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn pass_id(mut self, pass_id: PassId) -> Self {
        self.pass_id = Some(pass_id);
        self
    }

    pub fn reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builds the event. Severity is derived from the reason.
    pub fn build(self) -> Result<FleetEvent, EventError> {
        let reason = self.reason.ok_or(EventError::MissingField("reason"))?;
        Ok(FleetEvent {
            event_id: EventId::new(),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            fleet: self.fleet.ok_or(EventError::MissingField("fleet"))?,
            ordinal: self.ordinal,
            revision: self.revision,
            pass_id: self.pass_id,
            severity: reason.severity(),
            reason,
            message: self.message.unwrap_or_default(),
        })
    }
}
