//! Revision store.
//!
//! Revisions are immutable snapshots of a fleet's replica template, named
//! `{fleet-name}-{hash}`. Resolving a template either finds the revision
//! with identical canonical content or allocates a new one; a name taken by
//! different content is resolved by bumping the collision count, which salts
//! the hash.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use seedfleet_id::{FleetKey, RevisionName};
use tracing::{debug, info, warn};

use crate::client::RevisionBackend;
use crate::error::{ReconcileError, ReconcileResult, StoreError};
use crate::hash::TemplateHash;
use crate::model::{ReplicaTemplate, Revision};

/// Upper bound on salted re-hashes before giving up on a name.
pub const MAX_NAME_ATTEMPTS: u32 = 16;

/// Result of resolving a template.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The revision matching the template, flagged current.
    pub revision: Revision,

    /// True when this call persisted the revision.
    pub created: bool,

    /// Collision count after resolving; never lower than the input.
    pub collision_count: u32,

    /// Every revision of the fleet, oldest first, including `revision`.
    pub history: Vec<Revision>,
}

/// Revision operations for one fleet.
pub struct RevisionStore<'a> {
    backend: &'a dyn RevisionBackend,
    fleet: &'a FleetKey,
}

impl<'a> RevisionStore<'a> {
    pub fn new(backend: &'a dyn RevisionBackend, fleet: &'a FleetKey) -> Self {
        Self { backend, fleet }
    }

    /// All revisions of the fleet, oldest first.
    pub async fn list_ordered(&self) -> Result<Vec<Revision>, StoreError> {
        let mut revisions = self.backend.list_revisions(self.fleet).await?;
        revisions.sort_by(|a, b| {
            a.number
                .cmp(&b.number)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(revisions)
    }

    /// Find or create the revision for `template`.
    pub async fn resolve(
        &self,
        template: &ReplicaTemplate,
        collision_count: u32,
        now: DateTime<Utc>,
    ) -> ReconcileResult<Resolved> {
        let canonical = template.canonical_bytes();
        let mut collision_count = collision_count;
        let mut history = self.list_ordered().await?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            if let Some(index) = history
                .iter()
                .rposition(|rev| rev.template.same_content(template))
            {
                let revision = mark_current(&mut history, index);
                return Ok(Resolved {
                    revision,
                    created: false,
                    collision_count,
                    history,
                });
            }

            let hash = TemplateHash::compute(&canonical, collision_count);
            let name = RevisionName::derive(self.fleet, hash.as_str());
            if history.iter().any(|rev| rev.name == name) {
                warn!(
                    fleet = %self.fleet,
                    revision = %name,
                    collision_count,
                    "revision name collision, re-hashing"
                );
                collision_count += 1;
                continue;
            }

            let number = history.iter().map(|rev| rev.number).max().unwrap_or(0) + 1;
            let revision = Revision {
                name: name.clone(),
                fleet: self.fleet.clone(),
                number,
                template_hash: hash.to_string(),
                template: template.clone(),
                created_at: now,
                is_current: false,
            };

            match self.backend.create_revision(revision).await {
                Ok(created) => {
                    info!(
                        fleet = %self.fleet,
                        revision = %created.name,
                        number = created.number,
                        "created revision"
                    );
                    history.push(created);
                    let index = history.len() - 1;
                    let revision = mark_current(&mut history, index);
                    return Ok(Resolved {
                        revision,
                        created: true,
                        collision_count,
                        history,
                    });
                }
                Err(StoreError::AlreadyExists(_)) => {
                    // Created concurrently; the next round sees it.
                    debug!(fleet = %self.fleet, revision = %name, "revision already exists");
                    history = self.list_ordered().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReconcileError::RevisionCollision {
            fleet: self.fleet.clone(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Delete every revision for which `keep` is false.
    ///
    /// The current revision and revisions in `referenced` are never deleted.
    /// Returns the names actually removed.
    pub async fn prune<F>(
        &self,
        history: &[Revision],
        referenced: &HashSet<RevisionName>,
        keep: F,
    ) -> ReconcileResult<Vec<RevisionName>>
    where
        F: Fn(&Revision) -> bool,
    {
        let mut pruned = Vec::new();
        for revision in history {
            if revision.is_current || referenced.contains(&revision.name) || keep(revision) {
                continue;
            }
            match self
                .backend
                .delete_revision(self.fleet, &revision.name)
                .await
            {
                Ok(()) => pruned.push(revision.name.clone()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !pruned.is_empty() {
            info!(fleet = %self.fleet, count = pruned.len(), "pruned revisions");
        }
        Ok(pruned)
    }

    /// Delete every revision of the fleet.
    pub async fn purge(&self) -> ReconcileResult<usize> {
        let mut deleted = 0;
        for revision in self.list_ordered().await? {
            match self
                .backend
                .delete_revision(self.fleet, &revision.name)
                .await
            {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }
}

fn mark_current(history: &mut [Revision], index: usize) -> Revision {
    for (i, rev) in history.iter_mut().enumerate() {
        rev.is_current = i == index;
    }
    history[index].clone()
}

/// Names kept under a history limit.
///
/// The limit counts every revision, the current one included. Live
/// revisions (current or referenced) are always kept; the excess is taken
/// from the oldest of the rest.
pub fn retained(
    history: &[Revision],
    limit: u32,
    referenced: &HashSet<RevisionName>,
) -> HashSet<RevisionName> {
    let mut excess = history.len().saturating_sub(limit as usize);
    let mut keep = HashSet::new();
    for revision in history {
        let live = revision.is_current || referenced.contains(&revision.name);
        if !live && excess > 0 {
            excess -= 1;
            continue;
        }
        keep.insert(revision.name.clone());
    }
    keep
}
