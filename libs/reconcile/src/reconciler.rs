//! Fleet reconciler.
//!
//! One call to [`FleetReconciler::reconcile`] is one pass over one fleet:
//!
//! 1. read the fleet (clean up if it is gone) and validate its spec
//! 2. observe the replicas and resolve the update revision
//! 3. plan scale, or if there is nothing to scale, plan the rolling update
//! 4. execute at most one replica action
//! 5. discard the pass if the fleet changed meanwhile
//! 6. prune revisions, then recompute and write status
//!
//! Passes hold no state between calls; everything that must survive, such
//! as retry counts, lives in the fleet status.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use seedfleet_events::{FleetEvent, Reason};
use seedfleet_id::{FleetKey, PassId, ReplicaKey, RevisionName};
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::client::{EventSink, FleetStore, ReplicaClient, RevisionBackend};
use crate::error::{InvariantViolation, ReconcileError, ReconcileResult, ReplicaError};
use crate::health::{ObservedReplica, Pacing, ReplicaState, ReplicaView};
use crate::model::{ConditionType, Fleet, FleetPhase, FleetStatus, PendingReplica, Revision};
use crate::planner::{self, Action, Blocker, OrdinalPolicy, Step};
use crate::revision::{self, RevisionStore};
use crate::status::{self, StatusInput};
use crate::update;

/// Default requeue while a replica is progressing.
pub const DEFAULT_PROGRESS_REQUEUE: Duration = Duration::from_secs(5);

/// Default number of status write attempts on conflict.
pub const DEFAULT_STATUS_WRITE_ATTEMPTS: u32 = 5;

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub ordinal_policy: OrdinalPolicy,

    /// How long a replica must be ready before the next ordinal proceeds.
    pub min_ready: Duration,

    /// Backoff applied to failed replica actions.
    pub backoff: BackoffPolicy,

    /// Requeue delay while waiting on a replica to progress.
    pub progress_requeue: Duration,

    pub status_write_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ordinal_policy: OrdinalPolicy::OrderedReady,
            min_ready: Duration::ZERO,
            backoff: BackoffPolicy::default(),
            progress_requeue: DEFAULT_PROGRESS_REQUEUE,
            status_write_attempts: DEFAULT_STATUS_WRITE_ATTEMPTS,
        }
    }
}

// =============================================================================
// Pass Outcome
// =============================================================================

/// What a pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Status was written.
    Reconciled {
        phase: FleetPhase,
        executed: Option<Action>,
        requeue_after: Option<Duration>,
    },

    /// The fleet changed or disappeared mid-pass; results were discarded.
    Superseded,

    /// The pass was aborted on an invariant violation.
    Violated { message: String },

    /// The fleet is gone and its replicas and revisions were removed.
    CleanedUp {
        replicas_deleted: usize,
        revisions_deleted: usize,
        replicas_remaining: usize,
        requeue_after: Option<Duration>,
    },
}

impl PassOutcome {
    /// Delay before the fleet should be reconciled again, if at all.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            PassOutcome::Reconciled { requeue_after, .. }
            | PassOutcome::CleanedUp { requeue_after, .. } => *requeue_after,
            PassOutcome::Superseded => Some(Duration::ZERO),
            PassOutcome::Violated { .. } => None,
        }
    }
}

/// Result of one replica action.
enum ActionResult {
    Done(Option<ObservedReplica>),
    /// The observation the action was based on is outdated.
    Stale(ReplicaError),
    Failed(ReplicaError),
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives one fleet at a time toward its spec.
pub struct FleetReconciler {
    fleets: Arc<dyn FleetStore>,
    revisions: Arc<dyn RevisionBackend>,
    replicas: Arc<dyn ReplicaClient>,
    events: Arc<dyn EventSink>,
    config: ReconcilerConfig,
}

impl FleetReconciler {
    pub fn new(
        fleets: Arc<dyn FleetStore>,
        revisions: Arc<dyn RevisionBackend>,
        replicas: Arc<dyn ReplicaClient>,
        events: Arc<dyn EventSink>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            fleets,
            revisions,
            replicas,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn fleet_store(&self) -> &Arc<dyn FleetStore> {
        &self.fleets
    }

    /// Run one reconciliation pass for `key`.
    #[instrument(skip_all, fields(fleet = %key, pass_id = tracing::field::Empty))]
    pub async fn reconcile(&self, key: &FleetKey) -> ReconcileResult<PassOutcome> {
        let pass_id = PassId::new();
        tracing::Span::current().record("pass_id", tracing::field::display(&pass_id));
        let now = Utc::now();

        let Some(fleet) = self.fleets.get_fleet(key).await? else {
            return self.clean_up(key, pass_id).await;
        };

        let spec = match fleet.spec.validate() {
            Ok(spec) => spec,
            Err(violation) => return self.abort(&fleet, violation, pass_id, now).await,
        };

        let observed = self.replicas.list(key).await?;
        let mut replicas = match index_replicas(key, &observed) {
            Ok(replicas) => replicas,
            Err(violation) => return self.abort(&fleet, violation, pass_id, now).await,
        };

        let store = RevisionStore::new(self.revisions.as_ref(), key);
        let resolved = store
            .resolve(&spec.template, fleet.status.collision_count, now)
            .await?;
        let update_revision = resolved.revision.clone();
        if resolved.created {
            self.record(
                key,
                pass_id,
                Reason::RevisionCreated,
                None,
                Some(&update_revision.name),
                format!(
                    "created revision {} (number {})",
                    update_revision.name, update_revision.number
                ),
            );
        }

        // Plan: scale first, update only once the ordinal set is right.
        let pacing = Pacing::new(self.config.min_ready, now);
        let existing: BTreeSet<u32> = replicas.keys().copied().collect();
        let scale = planner::plan(spec.replicas, &existing);
        let (phase, step) = if !scale.is_empty() {
            let phase = if scale.to_delete.is_empty() {
                FleetPhase::ScalingOut
            } else {
                FleetPhase::ScalingIn
            };
            let step =
                planner::next_scale_step(&scale, &replicas, self.config.ordinal_policy, &pacing);
            (phase, step)
        } else {
            let step =
                update::next_update_step(spec.strategy, &replicas, &update_revision.name, &pacing);
            let phase = if step.is_idle() {
                FleetPhase::Normal
            } else {
                FleetPhase::RollingUpdate
            };
            (phase, step)
        };

        // A spec change abandons whatever the previous generation waited on.
        let previous_pending = fleet
            .status
            .pending_replica
            .clone()
            .filter(|p| p.generation == fleet.generation);

        let (pending, executed, requeue_after) = match step {
            Step::Execute(action) => {
                let backoff_left = previous_pending
                    .as_ref()
                    .filter(|p| p.ordinal == action.ordinal() && p.reason.is_failure())
                    .map(|p| self.config.backoff.remaining(p, now))
                    .filter(|left| !left.is_zero());

                if let Some(left) = backoff_left {
                    debug!(%action, remaining_ms = left.as_millis() as u64, "action backing off");
                    (previous_pending, None, Some(left))
                } else {
                    let result = self
                        .execute(key, action, &replicas, &update_revision)
                        .await;

                    // The fleet may have changed while the action ran.
                    let latest = self.fleets.get_fleet(key).await?;
                    if latest.is_none_or(|f| f.generation != fleet.generation) {
                        info!(%action, "fleet changed during pass, discarding result");
                        return Ok(PassOutcome::Superseded);
                    }

                    self.apply_result(
                        key,
                        pass_id,
                        action,
                        result,
                        &mut replicas,
                        &update_revision,
                        previous_pending,
                        fleet.generation,
                        now,
                    )
                }
            }
            Step::Wait(blocker) => {
                debug!(
                    ordinal = blocker.ordinal,
                    reason = ?blocker.reason,
                    "waiting on replica"
                );
                let pending = waiting_on(blocker, previous_pending, fleet.generation, now);
                (Some(pending), None, Some(self.config.progress_requeue))
            }
            Step::Idle => {
                let settled = replicas.values().all(|r| r.state == ReplicaState::Ready);
                let requeue = (!settled).then_some(self.config.progress_requeue);
                (None, None, requeue)
            }
        };

        let mut referenced: HashSet<RevisionName> =
            replicas.values().map(|r| r.revision.clone()).collect();
        referenced.insert(update_revision.name.clone());
        if let Some(current) = &fleet.status.current_revision {
            referenced.insert(current.clone());
        }
        let keep = revision::retained(&resolved.history, spec.revision_history_limit, &referenced);
        let pruned = store
            .prune(&resolved.history, &referenced, |rev| keep.contains(&rev.name))
            .await?;
        if !pruned.is_empty() {
            let names: Vec<&str> = pruned.iter().map(RevisionName::as_str).collect();
            self.record(
                key,
                pass_id,
                Reason::RevisionsPruned,
                None,
                None,
                format!("pruned revisions {}", names.join(", ")),
            );
        }
        let history: Vec<Revision> = resolved
            .history
            .into_iter()
            .filter(|rev| !pruned.contains(&rev.name))
            .collect();

        let written = self
            .write_status(&fleet, |latest| {
                status::recompute_status(StatusInput {
                    generation: latest.generation,
                    previous: &latest.status,
                    desired_replicas: spec.replicas,
                    replicas: &replicas,
                    update_revision: &update_revision.name,
                    history: &history,
                    collision_count: resolved.collision_count,
                    phase,
                    pending_replica: pending.clone(),
                    now,
                })
            })
            .await?;
        if !written {
            return Ok(PassOutcome::Superseded);
        }

        info!(
            %phase,
            executed = ?executed,
            replicas = replicas.len(),
            desired = spec.replicas,
            "pass complete"
        );
        Ok(PassOutcome::Reconciled {
            phase,
            executed,
            requeue_after,
        })
    }

    async fn execute(
        &self,
        fleet: &FleetKey,
        action: Action,
        replicas: &BTreeMap<u32, ReplicaView>,
        update_revision: &Revision,
    ) -> ActionResult {
        let key = fleet.replica(action.ordinal());
        let result = match action {
            Action::Create { .. } => match self.replicas.get(&key).await {
                // Already there: an earlier pass created it and the list was stale.
                Ok(Some(existing)) => Ok(Some(existing)),
                Ok(None) => self.replicas.create(&key, update_revision).await.map(Some),
                Err(e) => Err(e),
            },
            Action::Update { ordinal } => match replicas.get(&ordinal) {
                Some(view) => self
                    .replicas
                    .update(&key, update_revision, view.resource_version)
                    .await
                    .map(Some),
                None => Err(ReplicaError::NotFound(key.clone())),
            },
            Action::Delete { ordinal } => match replicas.get(&ordinal) {
                Some(view) => match self.replicas.delete(&key, view.resource_version).await {
                    Err(e) if e.is_not_found() => Ok(None),
                    other => other.map(|()| None),
                },
                None => Ok(None),
            },
        };

        match result {
            Ok(observed) => ActionResult::Done(observed),
            Err(ReplicaError::AlreadyExists(_)) => ActionResult::Done(None),
            Err(e) if e.is_conflict() || e.is_not_found() => ActionResult::Stale(e),
            Err(e) => ActionResult::Failed(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_result(
        &self,
        fleet: &FleetKey,
        pass_id: PassId,
        action: Action,
        result: ActionResult,
        replicas: &mut BTreeMap<u32, ReplicaView>,
        update_revision: &Revision,
        previous_pending: Option<PendingReplica>,
        generation: i64,
        now: DateTime<Utc>,
    ) -> (Option<PendingReplica>, Option<Action>, Option<Duration>) {
        let ordinal = action.ordinal();
        let revision = match action {
            Action::Delete { .. } => None,
            _ => Some(&update_revision.name),
        };

        match result {
            ActionResult::Done(observed) => {
                info!(%action, revision = ?revision.map(RevisionName::as_str), "replica action accepted");
                let (reason, message) = match action {
                    Action::Create { .. } => (
                        Reason::SuccessfulCreate,
                        format!("create replica {} from {}", fleet.replica(ordinal).name(), update_revision.name),
                    ),
                    Action::Update { .. } => (
                        Reason::SuccessfulUpdate,
                        format!("update replica {} to {}", fleet.replica(ordinal).name(), update_revision.name),
                    ),
                    Action::Delete { .. } => (
                        Reason::SuccessfulDelete,
                        format!("delete replica {}", fleet.replica(ordinal).name()),
                    ),
                };
                self.record(fleet, pass_id, reason, Some(ordinal), revision, message);

                match (action, observed) {
                    (Action::Delete { .. }, _) => {
                        if let Some(view) = replicas.get_mut(&ordinal) {
                            view.state = ReplicaState::Deleting;
                            view.ready_since = None;
                        }
                    }
                    (_, Some(observed)) => {
                        replicas.insert(ordinal, ReplicaView::from_observed(ordinal, &observed));
                    }
                    (_, None) => {}
                }

                let pending = PendingReplica {
                    ordinal,
                    reason: action.in_flight_reason(),
                    since: now,
                    last_attempt: None,
                    retries: 0,
                    generation,
                };
                (Some(pending), Some(action), Some(self.config.progress_requeue))
            }
            ActionResult::Stale(error) => {
                debug!(%action, %error, "replica changed since observed, retrying");
                (previous_pending, None, Some(self.config.progress_requeue))
            }
            ActionResult::Failed(error) => {
                let failure = action.failure_reason();
                let previous = previous_pending
                    .filter(|p| p.ordinal == ordinal && p.reason == failure);
                let retries = previous.as_ref().map_or(0, |p| p.retries) + 1;
                let since = previous.as_ref().map_or(now, |p| p.since);
                let delay = self.config.backoff.jittered(retries);

                warn!(
                    %action,
                    %error,
                    transient = error.is_transient(),
                    retries,
                    retry_in_ms = delay.as_millis() as u64,
                    "replica action failed"
                );
                let reason = match action {
                    Action::Create { .. } => Reason::FailedCreate,
                    Action::Update { .. } => Reason::FailedUpdate,
                    Action::Delete { .. } => Reason::FailedDelete,
                };
                self.record(
                    fleet,
                    pass_id,
                    reason,
                    Some(ordinal),
                    revision,
                    format!("{action} failed (attempt {retries}): {error}"),
                );

                let pending = PendingReplica {
                    ordinal,
                    reason: failure,
                    since,
                    last_attempt: Some(now),
                    retries,
                    generation,
                };
                (Some(pending), None, Some(delay))
            }
        }
    }

    /// Write a status built from the latest fleet, re-reading on conflict.
    ///
    /// Returns false when the fleet was deleted or its generation moved, in
    /// which case nothing was written.
    async fn write_status<F>(&self, fleet: &Fleet, build: F) -> ReconcileResult<bool>
    where
        F: Fn(&Fleet) -> FleetStatus,
    {
        let generation = fleet.generation;
        let mut latest = fleet.clone();

        for attempt in 1..=self.config.status_write_attempts {
            let status = build(&latest);
            if status == latest.status {
                return Ok(true);
            }

            match self
                .fleets
                .update_status(&latest.key, status, latest.resource_version)
                .await
            {
                Ok(_) => return Ok(true),
                Err(e) if e.is_conflict() => {
                    debug!(attempt, error = %e, "status write conflict, re-reading fleet");
                    match self.fleets.get_fleet(&latest.key).await? {
                        Some(reread) if reread.generation == generation => latest = reread,
                        _ => return Ok(false),
                    }
                }
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReconcileError::SpecConflict {
            fleet: fleet.key.clone(),
            attempts: self.config.status_write_attempts,
        })
    }

    async fn abort(
        &self,
        fleet: &Fleet,
        violation: InvariantViolation,
        pass_id: PassId,
        now: DateTime<Utc>,
    ) -> ReconcileResult<PassOutcome> {
        warn!(violation = %violation, "invariant violated, aborting pass");

        let already_reported = fleet
            .status
            .condition(ConditionType::InvariantViolated)
            .is_some_and(|c| c.status && c.message == violation.message);
        if !already_reported {
            self.record(
                &fleet.key,
                pass_id,
                Reason::InvariantViolation,
                None,
                None,
                violation.message.clone(),
            );
        }

        let written = self
            .write_status(fleet, |latest| {
                status::violation_status(&latest.status, latest.generation, &violation.message, now)
            })
            .await?;
        if !written {
            return Ok(PassOutcome::Superseded);
        }
        Ok(PassOutcome::Violated {
            message: violation.message,
        })
    }

    /// Delete everything a removed fleet owned.
    async fn clean_up(&self, key: &FleetKey, pass_id: PassId) -> ReconcileResult<PassOutcome> {
        let mut owned: Vec<(ReplicaKey, ObservedReplica)> = Vec::new();
        for observed in self.replicas.list(key).await? {
            match ReplicaKey::parse_name(key, &observed.name) {
                Ok(replica) => owned.push((replica, observed)),
                Err(e) => warn!(name = %observed.name, error = %e, "skipping unparseable replica"),
            }
        }
        owned.sort_by(|a, b| b.0.ordinal().cmp(&a.0.ordinal()));

        let mut replicas_deleted = 0;
        for (replica, observed) in &owned {
            if observed.status.deletion_requested {
                continue;
            }
            match self.replicas.delete(replica, observed.resource_version).await {
                Ok(()) => replicas_deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let revisions_deleted = RevisionStore::new(self.revisions.as_ref(), key)
            .purge()
            .await?;

        let replicas_remaining = owned.len();
        if replicas_remaining == 0 {
            info!(revisions_deleted, "fleet removed, nothing left to clean up");
            if revisions_deleted > 0 {
                self.record(
                    key,
                    pass_id,
                    Reason::FleetCleanedUp,
                    None,
                    None,
                    format!("deleted {revisions_deleted} revisions"),
                );
            }
        } else {
            info!(
                replicas_deleted,
                replicas_remaining, revisions_deleted, "fleet removed, deleting replicas"
            );
            self.record(
                key,
                pass_id,
                Reason::FleetCleanedUp,
                None,
                None,
                format!(
                    "deleting {replicas_remaining} replicas, {revisions_deleted} revisions removed"
                ),
            );
        }

        Ok(PassOutcome::CleanedUp {
            replicas_deleted,
            revisions_deleted,
            replicas_remaining,
            requeue_after: (replicas_remaining > 0).then_some(self.config.progress_requeue),
        })
    }

    fn record(
        &self,
        fleet: &FleetKey,
        pass_id: PassId,
        reason: Reason,
        ordinal: Option<u32>,
        revision: Option<&RevisionName>,
        message: String,
    ) {
        let mut builder = FleetEvent::builder()
            .fleet(fleet.clone())
            .pass_id(pass_id)
            .reason(reason)
            .message(message);
        if let Some(ordinal) = ordinal {
            builder = builder.ordinal(ordinal);
        }
        if let Some(revision) = revision {
            builder = builder.revision(revision.clone());
        }

        match builder.build() {
            Ok(event) => self.events.record(event),
            Err(e) => warn!(error = %e, "failed to build event"),
        }
    }
}

/// Index observed replicas by ordinal.
fn index_replicas(
    fleet: &FleetKey,
    observed: &[ObservedReplica],
) -> Result<BTreeMap<u32, ReplicaView>, InvariantViolation> {
    let mut replicas = BTreeMap::new();
    for replica in observed {
        let key = ReplicaKey::parse_name(fleet, &replica.name).map_err(|e| {
            InvariantViolation::new(format!("replica {}: {e}", replica.name))
        })?;
        let ordinal = key.ordinal();
        if replicas
            .insert(ordinal, ReplicaView::from_observed(ordinal, replica))
            .is_some()
        {
            return Err(InvariantViolation::new(format!(
                "ordinal {ordinal} is claimed by more than one replica"
            )));
        }
    }
    Ok(replicas)
}

/// Pending entry for a replica the pass waits on.
fn waiting_on(
    blocker: Blocker,
    previous: Option<PendingReplica>,
    generation: i64,
    now: DateTime<Utc>,
) -> PendingReplica {
    match previous {
        Some(p) if p.ordinal == blocker.ordinal && p.reason == blocker.reason => p,
        _ => PendingReplica {
            ordinal: blocker.ordinal,
            reason: blocker.reason,
            since: now,
            last_attempt: None,
            retries: 0,
            generation,
        },
    }
}
