//! Fleet, revision and status data model.

use std::fmt;

use chrono::{DateTime, Utc};
use seedfleet_id::{FleetKey, RevisionName};
use serde::{Deserialize, Serialize};

use crate::error::InvariantViolation;
use crate::hash::{canonical_json, TemplateHash};

/// Schema version written into new template envelopes.
pub const TEMPLATE_SCHEMA_VERSION: u32 = 1;

/// Default number of replicas.
pub const DEFAULT_REPLICAS: i32 = 1;

/// Default number of retained revisions.
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

// =============================================================================
// Resource Version
// =============================================================================

/// Optimistic-concurrency token of a stored object.
///
/// Writes carry the last observed version and are rejected when the stored
/// object has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Replica Template
// =============================================================================

/// Opaque replica template in a schema-versioned envelope.
///
/// The controller never interprets `body`; it only canonicalizes, hashes and
/// compares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaTemplate {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub body: serde_json::Value,
}

fn default_schema_version() -> u32 {
    TEMPLATE_SCHEMA_VERSION
}

impl Default for ReplicaTemplate {
    fn default() -> Self {
        Self::new(serde_json::Value::Null)
    }
}

impl ReplicaTemplate {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            body,
        }
    }

    /// Canonical encoding of the whole envelope: sorted keys, no whitespace.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let envelope = serde_json::json!({
            "schemaVersion": self.schema_version,
            "body": self.body,
        });
        canonical_json(&envelope).into_bytes()
    }

    pub fn hash(&self, collision_count: u32) -> TemplateHash {
        TemplateHash::compute(&self.canonical_bytes(), collision_count)
    }

    /// True when both templates canonicalize to the same bytes.
    pub fn same_content(&self, other: &ReplicaTemplate) -> bool {
        self.canonical_bytes() == other.canonical_bytes()
    }
}

// =============================================================================
// Fleet Spec
// =============================================================================

/// How existing replicas pick up a new template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateStrategyType {
    /// Replicas at or above the partition are updated in place, highest
    /// ordinal first.
    #[default]
    RollingUpdate,

    /// Replicas are only replaced when deleted externally.
    OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateStrategy {
    /// Ordinals below the partition are never updated automatically.
    #[serde(default)]
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(rename = "type", default)]
    pub strategy_type: UpdateStrategyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateStrategy>,
}

impl UpdateStrategy {
    pub fn rolling(partition: i32) -> Self {
        Self {
            strategy_type: UpdateStrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdateStrategy { partition }),
        }
    }

    pub fn on_delete() -> Self {
        Self {
            strategy_type: UpdateStrategyType::OnDelete,
            rolling_update: None,
        }
    }
}

/// Desired state of a fleet, as stored.
///
/// Counts are signed because the stored object is not trusted to be
/// well-formed; [`FleetSpec::validate`] turns it into a [`ValidatedSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    pub template: ReplicaTemplate,

    #[serde(default)]
    pub update_strategy: UpdateStrategy,

    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: i32,
}

fn default_replicas() -> i32 {
    DEFAULT_REPLICAS
}

fn default_revision_history_limit() -> i32 {
    DEFAULT_REVISION_HISTORY_LIMIT
}

impl Default for FleetSpec {
    fn default() -> Self {
        Self::new(ReplicaTemplate::default())
    }
}

impl FleetSpec {
    /// A spec with default replicas, strategy and history limit.
    pub fn new(template: ReplicaTemplate) -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            template,
            update_strategy: UpdateStrategy::default(),
            revision_history_limit: DEFAULT_REVISION_HISTORY_LIMIT,
        }
    }

    /// Check the stored spec and convert counts to their unsigned form.
    pub fn validate(&self) -> Result<ValidatedSpec, InvariantViolation> {
        let replicas = non_negative("spec.replicas", self.replicas)?;
        let revision_history_limit =
            non_negative("spec.revisionHistoryLimit", self.revision_history_limit)?;

        let strategy = match self.update_strategy.strategy_type {
            UpdateStrategyType::OnDelete => EffectiveStrategy::OnDelete,
            UpdateStrategyType::RollingUpdate => {
                let partition = self
                    .update_strategy
                    .rolling_update
                    .as_ref()
                    .map_or(0, |r| r.partition);
                EffectiveStrategy::RollingUpdate {
                    partition: non_negative(
                        "spec.updateStrategy.rollingUpdate.partition",
                        partition,
                    )?,
                }
            }
        };

        Ok(ValidatedSpec {
            replicas,
            template: self.template.clone(),
            strategy,
            revision_history_limit,
        })
    }
}

fn non_negative(field: &str, value: i32) -> Result<u32, InvariantViolation> {
    u32::try_from(value)
        .map_err(|_| InvariantViolation::new(format!("{field} must be non-negative, got {value}")))
}

/// Update strategy after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveStrategy {
    RollingUpdate { partition: u32 },
    OnDelete,
}

/// A spec whose invariants hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSpec {
    pub replicas: u32,
    pub template: ReplicaTemplate,
    pub strategy: EffectiveStrategy,
    pub revision_history_limit: u32,
}

// =============================================================================
// Fleet
// =============================================================================

/// A fleet object as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fleet {
    pub key: FleetKey,

    /// Bumped by the store on every spec change.
    pub generation: i64,

    pub resource_version: ResourceVersion,

    pub spec: FleetSpec,

    #[serde(default)]
    pub status: FleetStatus,
}

// =============================================================================
// Revision
// =============================================================================

/// An immutable snapshot of a replica template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub name: RevisionName,

    pub fleet: FleetKey,

    /// Monotonic per fleet; orders revisions oldest first.
    pub number: u64,

    pub template_hash: String,

    pub template: ReplicaTemplate,

    pub created_at: DateTime<Utc>,

    /// Set on the revision matching the fleet's current template when the
    /// history is resolved; never persisted.
    #[serde(skip)]
    pub is_current: bool,
}

// =============================================================================
// Status
// =============================================================================

/// The reconciler state machine state recorded by the last pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FleetPhase {
    #[default]
    Normal,
    ScalingOut,
    ScalingIn,
    RollingUpdate,
}

impl fmt::Display for FleetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FleetPhase::Normal => "Normal",
            FleetPhase::ScalingOut => "ScalingOut",
            FleetPhase::ScalingIn => "ScalingIn",
            FleetPhase::RollingUpdate => "RollingUpdate",
        };
        f.write_str(s)
    }
}

/// Why ordinal progression is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingReason {
    /// Replica is being created.
    Creating,
    /// Replica is applying a new revision.
    Updating,
    /// Replica is being deleted.
    Deleting,
    /// Replica exists but is not (long enough) ready.
    NotReady,
    /// Replica reports an error.
    ReplicaError,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
}

impl PendingReason {
    /// Reasons caused by a failed call of ours; these carry a retry count.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PendingReason::CreateFailed | PendingReason::UpdateFailed | PendingReason::DeleteFailed
        )
    }
}

/// The replica currently blocking progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReplica {
    pub ordinal: u32,

    pub reason: PendingReason,

    /// When the replica entered this reason.
    pub since: DateTime<Utc>,

    /// When the last failed attempt happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,

    /// Consecutive failed attempts.
    #[serde(default)]
    pub retries: u32,

    /// Fleet generation this entry was recorded under; a spec change
    /// abandons it.
    pub generation: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    ReplicasReady,
    Progressing,
    InvariantViolated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Observed state of a fleet. Always derived, never edited by hand.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatus {
    #[serde(default)]
    pub observed_generation: i64,

    /// Replicas that exist.
    #[serde(default)]
    pub replicas: u32,

    #[serde(default)]
    pub ready_replicas: u32,

    /// Replicas on `current_revision`.
    #[serde(default)]
    pub current_replicas: u32,

    /// Replicas on `update_revision`.
    #[serde(default)]
    pub updated_replicas: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<RevisionName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<RevisionName>,

    #[serde(default)]
    pub collision_count: u32,

    #[serde(default)]
    pub phase: FleetPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_replica: Option<PendingReplica>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<FleetCondition>,
}

impl FleetStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&FleetCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Set a condition, keeping its transition time when the status did not
    /// flip.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(FleetCondition {
                condition_type,
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }
}
