//! Activation of approved changes.
//!
//! The executor re-reads the live entity, applies the proposal's diff to it
//! and commits the entity rows, the finished proposal and the audit entry in
//! one batch. The batch carries version preconditions on the entity and on
//! the proposal, so a concurrent writer makes the commit fail instead of
//! being overwritten.

use chrono::{DateTime, Utc};
use fleetgov_store::{GovernanceStore, Precondition, StoreError, Write, WriteBatch};
use fleetgov_types::{
    AuditAction, AuditLogEntry, ChangeProposal, DiffError, EntityRef, FieldError, PricingProfile,
    ProfileId, ProfileStatus, ProposalStatus, Role, RoleId, UserId,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{GovernanceError, Result};

/// Entity state after an activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum AppliedEntity {
    Role(Role),
    PricingProfile(PricingProfile),
}

impl AppliedEntity {
    pub fn version(&self) -> u64 {
        match self {
            Self::Role(role) => role.version,
            Self::PricingProfile(profile) => profile.version,
        }
    }
}

/// Outcome of a committed activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChange {
    pub proposal: ChangeProposal,
    pub entity: AppliedEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_profile: Option<ProfileId>,
    pub activated_at: DateTime<Utc>,
}

/// System roles keep their name and level.
pub(crate) fn system_role_violations(current: &Role, name: &str, level: u32) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if current.is_system {
        if current.name != name {
            errors.push(FieldError::new("name", "system roles cannot be renamed"));
        }
        if current.level != level {
            errors.push(FieldError::new("level", "system role levels are fixed"));
        }
    }
    errors
}

pub struct ActivationExecutor {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
}

impl ActivationExecutor {
    pub fn new(store: Arc<dyn GovernanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply `proposal` to its entity.
    ///
    /// `proposal` must be at its stored version; `batch` carries any writes
    /// that belong to the same transition (the final approval, for example)
    /// and is committed together with the activation. The commit re-reads the
    /// emergency brake and fails with `EmergencyBrake` if it is engaged.
    pub async fn activate(
        &self,
        proposal: &ChangeProposal,
        actor: &UserId,
        mut batch: WriteBatch,
    ) -> Result<AppliedChange> {
        let now = self.clock.now();

        batch
            .require(Precondition::ProposalVersion {
                id: proposal.id,
                version: proposal.version,
            })
            .require(Precondition::BrakeReleased);

        let (entity, superseded_profile) = match proposal.entity {
            EntityRef::Role(id) => {
                let role = self.plan_role(id, proposal, now, &mut batch).await?;
                (AppliedEntity::Role(role), None)
            }
            EntityRef::PricingProfile(id) => {
                let (profile, superseded) =
                    self.plan_profile(id, proposal, actor, now, &mut batch).await?;
                (AppliedEntity::PricingProfile(profile), superseded)
            }
        };

        let mut finished = proposal.clone();
        finished.status = ProposalStatus::Active;
        finished.emergency_blocked = false;
        finished.activated_at = Some(now);
        finished.updated_at = now;
        finished.version += 1;

        batch.push(Write::PutProposal(finished.clone()));
        batch.audit(
            AuditLogEntry::new(
                proposal.entity.kind().as_str(),
                proposal.entity,
                actor.clone(),
                AuditAction::ChangeActivated,
                now,
            )
            .with_values(
                Some(proposal.diff.old_snapshot()),
                Some(proposal.diff.new_snapshot()),
            )
            .with_scope(proposal.region_id.clone(), proposal.service_key.clone())
            .with_reason(format!("proposal {}", proposal.id)),
        );

        let writes = batch.len();
        if let Err(err) = self.store.commit(batch).await {
            warn!(
                proposal_id = %proposal.id,
                entity = %proposal.entity,
                error = %err,
                "Activation rolled back"
            );
            return Err(commit_error(err));
        }

        info!(
            proposal_id = %proposal.id,
            entity = %proposal.entity,
            version = entity.version(),
            writes,
            "Change activated"
        );

        Ok(AppliedChange {
            proposal: finished,
            entity,
            superseded_profile,
            activated_at: now,
        })
    }

    async fn plan_role(
        &self,
        id: RoleId,
        proposal: &ChangeProposal,
        now: DateTime<Utc>,
        batch: &mut WriteBatch,
    ) -> Result<Role> {
        let current = self
            .store
            .get_role(&id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))?;

        let mut next: Role = proposal
            .diff
            .apply(&current)
            .map_err(|err| apply_error(&proposal.entity, err))?;

        let violations = system_role_violations(&current, &next.name, next.level);
        if !violations.is_empty() {
            return Err(GovernanceError::validation(violations));
        }

        next.id = current.id;
        next.is_system = current.is_system;
        next.created_at = current.created_at;
        next.version = current.version + 1;
        next.updated_at = now;

        batch.require(Precondition::RoleVersion {
            id,
            version: current.version,
        });
        if next.name != current.name {
            batch.require(Precondition::RoleNameAvailable(next.name.clone()));
        }
        batch.push(Write::UpdateRole(next.clone()));
        Ok(next)
    }

    async fn plan_profile(
        &self,
        id: ProfileId,
        proposal: &ChangeProposal,
        actor: &UserId,
        now: DateTime<Utc>,
        batch: &mut WriteBatch,
    ) -> Result<(PricingProfile, Option<ProfileId>)> {
        let current = self
            .store
            .get_profile(&id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))?;

        let mut next: PricingProfile = proposal
            .diff
            .apply(&current)
            .map_err(|err| apply_error(&proposal.entity, err))?;
        next.id = current.id;
        next.region_id = current.region_id.clone();
        next.service_key = current.service_key.clone();
        next.created_at = current.created_at;
        next.version = current.version + 1;
        next.updated_at = now;

        batch.require(Precondition::ProfileVersion {
            id,
            version: current.version,
        });
        batch.push(Write::UpdateProfileHeader(next.clone()));

        // Only the nested rows the diff touches are written.
        for key in proposal.diff.changed_items("components") {
            match next.components.get(key) {
                Some(component) => batch.push(Write::UpsertComponent {
                    profile_id: id,
                    key: key.to_string(),
                    component: component.clone(),
                }),
                None => batch.push(Write::DeleteComponent {
                    profile_id: id,
                    key: key.to_string(),
                }),
            };
        }
        if !proposal.diff.changed_items("earnings_policy").is_empty() {
            batch.push(Write::UpsertEarnings {
                profile_id: id,
                policy: next.earnings_policy.clone(),
            });
        }

        let mut superseded = None;
        if let Some(old_id) = proposal.supersedes.filter(|old| *old != id) {
            let old = self
                .store
                .get_profile(&old_id)
                .await?
                .ok_or_else(|| GovernanceError::NotFound(format!("{old_id} not found")))?;

            if old.status != ProfileStatus::Superseded {
                let mut retired = old.clone();
                retired.status = ProfileStatus::Superseded;
                retired.version = old.version + 1;
                retired.updated_at = now;

                batch.require(Precondition::ProfileVersion {
                    id: old_id,
                    version: old.version,
                });
                batch.push(Write::UpdateProfileHeader(retired));
                batch.audit(
                    AuditLogEntry::new(
                        "pricing_profile",
                        old_id,
                        actor.clone(),
                        AuditAction::ProfileSuperseded,
                        now,
                    )
                    .with_values(
                        Some(json!({ "status": old.status.as_str() })),
                        Some(json!({
                            "status": ProfileStatus::Superseded.as_str(),
                            "supersededBy": id.to_string(),
                        })),
                    )
                    .with_scope(Some(old.region_id.clone()), Some(old.service_key.clone())),
                );
                superseded = Some(old_id);
            }
        }

        Ok((next, superseded))
    }
}

impl std::fmt::Debug for ActivationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationExecutor").finish_non_exhaustive()
    }
}

fn apply_error(entity: &EntityRef, err: DiffError) -> GovernanceError {
    match err {
        DiffError::Conflict { field, .. } => GovernanceError::InvalidState(format!(
            "{entity} changed since the proposal was made (field {field})"
        )),
        other => GovernanceError::ActivationFailed(other.to_string()),
    }
}

fn commit_error(err: StoreError) -> GovernanceError {
    match err {
        StoreError::PreconditionFailed(Precondition::RoleNameAvailable(name)) => {
            GovernanceError::Conflict(format!("role name {name} is already in use"))
        }
        StoreError::PreconditionFailed(Precondition::BrakeReleased) => {
            GovernanceError::EmergencyBrake("engaged before the activation committed".to_string())
        }
        // The proposal or the entity moved after it was read.
        StoreError::PreconditionFailed(other) => {
            GovernanceError::InvalidState(format!("{other} no longer holds; refresh and retry"))
        }
        StoreError::NotFound(what) => GovernanceError::NotFound(what),
        StoreError::Conflict(what) => GovernanceError::Conflict(what),
        other => GovernanceError::ActivationFailed(other.to_string()),
    }
}
