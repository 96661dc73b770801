//! Governed-change proposals.
//!
//! Lifecycle:
//!
//! ```text
//! propose ─► pending ─┬─ approve (threshold met, brake clear) ─► approved ─► active
//!                     ├─ approve (threshold met, brake engaged) ─► pending + emergency_blocked
//!                     ├─ reject ─► rejected
//!                     └─ cancel ─► cancelled
//! ```
//!
//! Transitions on one proposal are serialized by a per-proposal lock, and
//! every commit carries a version precondition, so two approvals can never
//! both observe the last missing approval. The brake position is re-read by
//! the store inside the committing transaction: an activation requires it
//! released and holding a proposal back requires it engaged. When it moved
//! in between, the transition is re-planned against the new position.

use chrono::{DateTime, Utc};
use fleetgov_store::{GovernanceStore, Precondition, StoreError, Write, WriteBatch};
use fleetgov_types::{
    AuditAction, AuditLogEntry, ChangeDiff, ChangeProposal, DesiredState, DiffError, EntityRef,
    FieldError, ProfileId, ProposalId, ProposalStatus, ProposalSummary, RegionId, Role,
    RoleDraft, RoleId, ServiceKey, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::brake::EmergencyBrake;
use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::entities::EntityRegistry;
use crate::error::{GovernanceError, Result};
use crate::executor::{system_role_violations, ActivationExecutor};
use crate::locks::KeyedLocks;

/// Times a transition is re-planned when the brake moves under it.
const BRAKE_ATTEMPTS: usize = 3;

/// Optional settings for a new proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalOptions {
    #[serde(default)]
    pub justification: Option<String>,

    /// Raises the approval threshold
    #[serde(default)]
    pub regulator_impact: bool,

    /// Earliest time the change may take effect
    #[serde(default)]
    pub effective_at: Option<DateTime<Utc>>,

    /// Pricing profile replaced by this change
    #[serde(default)]
    pub supersedes: Option<ProfileId>,

    /// Cancel an outstanding pending proposal instead of failing
    #[serde(default)]
    pub supersede_pending: bool,
}

impl ProposalOptions {
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn regulator_impacting(mut self) -> Self {
        self.regulator_impact = true;
        self
    }

    pub fn effective_at(mut self, at: DateTime<Utc>) -> Self {
        self.effective_at = Some(at);
        self
    }

    pub fn superseding(mut self, profile: ProfileId) -> Self {
        self.supersedes = Some(profile);
        self
    }

    pub fn replacing_pending(mut self) -> Self {
        self.supersede_pending = true;
        self
    }
}

/// One row of a bulk role import.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRoleItem {
    #[serde(flatten)]
    pub draft: RoleDraft,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub regulator_impact: bool,
}

/// What happened to one successful bulk item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkOutcome {
    /// Unknown name: the role was created
    Created { index: usize, role: Role },
    /// Existing name: an update proposal was filed
    Proposed {
        index: usize,
        role_id: RoleId,
        proposal: ProposalSummary,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub index: usize,
    pub error: String,
}

/// Per-item results of a bulk import. Items fail independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub imported: usize,
    pub failed: usize,
    pub results: Vec<BulkOutcome>,
    pub errors: Vec<BulkItemError>,
}

impl BulkResult {
    /// 201 when anything was imported, 400 otherwise.
    pub fn http_status(&self) -> u16 {
        if self.imported > 0 {
            201
        } else {
            400
        }
    }
}

pub struct ProposalWorkflow {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
    brake: Arc<EmergencyBrake>,
    executor: ActivationExecutor,
    entities: Arc<EntityRegistry>,
    locks: KeyedLocks<ProposalId>,
}

impl ProposalWorkflow {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
        brake: Arc<EmergencyBrake>,
        entities: Arc<EntityRegistry>,
    ) -> Self {
        Self {
            executor: ActivationExecutor::new(store.clone(), clock.clone()),
            store,
            clock,
            config,
            brake,
            entities,
            locks: KeyedLocks::new(),
        }
    }

    /// File a proposal to move `entity` to `desired`.
    ///
    /// The live entity is not touched. Fails with `Conflict` when a pending
    /// proposal already targets the entity, unless the options ask to
    /// replace it.
    pub async fn propose(
        &self,
        entity: EntityRef,
        requested_by: &UserId,
        desired: DesiredState,
        options: ProposalOptions,
    ) -> Result<ChangeProposal> {
        if entity.kind() != desired.kind() {
            return Err(GovernanceError::validation(vec![FieldError::new(
                "desired_state",
                format!("expected a {} state", entity.kind()),
            )]));
        }

        let target = self.load_target(entity, &desired, &options).await?;
        if !target.diff.has_changes() {
            return Err(GovernanceError::validation(vec![FieldError::new(
                "desired_state",
                "no changes from the current state",
            )]));
        }

        let now = self.clock.now();
        let needs = self.config.required_approvals(options.regulator_impact);
        let mut proposal = ChangeProposal::new(
            entity,
            requested_by.clone(),
            target.diff,
            target.base_version,
            needs,
            now,
        );
        proposal.region_id = target.region_id;
        proposal.service_key = target.service_key;
        proposal.justification = options.justification;
        proposal.regulator_impact = options.regulator_impact;
        proposal.effective_at = options.effective_at;
        proposal.supersedes = options.supersedes;
        proposal.emergency_blocked = self.brake.is_active().await?;

        let mut batch = WriteBatch::new();
        let replaced = if options.supersede_pending {
            self.store.find_pending_proposal(&entity).await?
        } else {
            None
        };

        match &replaced {
            Some(old) => {
                let mut cancelled = old.clone();
                cancelled.status = ProposalStatus::Cancelled;
                cancelled.reviewed_by = Some(requested_by.clone());
                cancelled.review_reason = Some(format!("superseded by {}", proposal.id));
                cancelled.updated_at = now;
                cancelled.version += 1;
                proposal.superseded_proposal = Some(old.id);

                batch
                    .require(Precondition::ProposalVersion {
                        id: old.id,
                        version: old.version,
                    })
                    .require(Precondition::NoPendingProposal {
                        entity,
                        except: Some(old.id),
                    })
                    .push(Write::PutProposal(cancelled))
                    .audit(
                        self.proposal_entry(old, requested_by, AuditAction::ProposalSuperseded, now)
                            .with_reason(format!("superseded by {}", proposal.id)),
                    );
            }
            None => {
                batch.require(Precondition::NoPendingProposal {
                    entity,
                    except: None,
                });
            }
        }

        let mut created =
            self.proposal_entry(&proposal, requested_by, AuditAction::ProposalCreated, now);
        created = created.with_values(
            Some(proposal.diff.old_snapshot()),
            Some(proposal.diff.new_snapshot()),
        );
        if let Some(justification) = &proposal.justification {
            created = created.with_reason(justification.as_str());
        }
        batch.push(Write::PutProposal(proposal.clone())).audit(created);

        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(Precondition::NoPendingProposal { .. }) => {
                GovernanceError::Conflict(format!(
                    "a pending proposal already targets {entity}"
                ))
            }
            StoreError::PreconditionFailed(other) => GovernanceError::Conflict(format!(
                "{other} no longer holds; refresh and retry"
            )),
            other => other.into(),
        })?;

        info!(
            proposal_id = %proposal.id,
            entity = %entity,
            requested_by = %requested_by,
            needs_approvals = needs,
            changed = ?proposal.diff.changed_fields(),
            "Proposal created"
        );
        if proposal.emergency_blocked {
            warn!(proposal_id = %proposal.id, "Proposal created while emergency brake is engaged");
        }
        if let Some(old) = replaced {
            info!(proposal_id = %old.id, replaced_by = %proposal.id, "Pending proposal superseded");
        }

        Ok(proposal)
    }

    /// Record an approval and activate once the threshold is met.
    ///
    /// A distinct approver arriving after the threshold was already met adds
    /// nothing and re-checks the proposal instead.
    pub async fn approve(&self, id: &ProposalId, approver: &UserId) -> Result<ChangeProposal> {
        let _guard = self.locks.lock(*id).await;

        let mut proposal = self.load(id).await?;
        if !proposal.is_pending() {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only pending proposals can be approved",
                proposal.status
            )));
        }
        if proposal.has_approved(approver) {
            return Err(GovernanceError::DuplicateApproval {
                proposal: id.to_string(),
                approver: approver.to_string(),
            });
        }

        let now = self.clock.now();
        if !proposal.add_approval(approver.clone(), now) {
            debug!(proposal_id = %id, approver = %approver, "Threshold already met, re-checking");
            return self.advance(proposal, approver, WriteBatch::new()).await;
        }

        let mut batch = WriteBatch::new();
        batch.audit(
            self.proposal_entry(&proposal, approver, AuditAction::ProposalApproved, now)
                .with_values(
                    None,
                    Some(json!({
                        "approvals": proposal.approval_count(),
                        "needsApprovals": proposal.needs_approvals,
                    })),
                ),
        );

        info!(
            proposal_id = %id,
            approver = %approver,
            approvals = proposal.approval_count(),
            needs = proposal.needs_approvals,
            "Approval recorded"
        );

        if !proposal.threshold_met() {
            return self.persist(proposal, batch, now).await;
        }
        self.advance(proposal, approver, batch).await
    }

    /// Re-evaluate a pending proposal whose approvals are complete.
    pub async fn recheck(&self, id: &ProposalId, actor: &UserId) -> Result<ChangeProposal> {
        let _guard = self.locks.lock(*id).await;

        let mut proposal = self.load(id).await?;
        if !proposal.is_pending() {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only pending proposals can be re-checked",
                proposal.status
            )));
        }

        if proposal.threshold_met() {
            return self.advance(proposal, actor, WriteBatch::new()).await;
        }

        // Not ready yet; just drop a stale block flag.
        if proposal.emergency_blocked && !self.brake.is_active().await? {
            proposal.emergency_blocked = false;
            let now = self.clock.now();
            return self.persist(proposal, WriteBatch::new(), now).await;
        }
        Ok(proposal)
    }

    /// Re-check every emergency-blocked proposal: pending ones through
    /// [`recheck`](Self::recheck), approved ones through
    /// [`activate_approved`](Self::activate_approved). Failures are logged
    /// and skipped.
    pub async fn reevaluate_blocked(&self, actor: &UserId) -> Result<Vec<ChangeProposal>> {
        let blocked: Vec<(ProposalId, ProposalStatus)> = self
            .store
            .list_proposals(None)
            .await?
            .into_iter()
            .filter(|p| p.emergency_blocked)
            .filter(|p| matches!(p.status, ProposalStatus::Pending | ProposalStatus::Approved))
            .map(|p| (p.id, p.status))
            .collect();

        let mut results = Vec::with_capacity(blocked.len());
        for (id, status) in blocked {
            let outcome = match status {
                ProposalStatus::Approved => self.activate_approved(&id, actor).await,
                _ => self.recheck(&id, actor).await,
            };
            match outcome {
                Ok(proposal) => results.push(proposal),
                Err(err) => {
                    warn!(proposal_id = %id, error = %err, "Blocked proposal re-check failed")
                }
            }
        }
        Ok(results)
    }

    pub async fn reject(
        &self,
        id: &ProposalId,
        reviewer: &UserId,
        reason: impl Into<String>,
    ) -> Result<ChangeProposal> {
        let reason = reason.into();
        let _guard = self.locks.lock(*id).await;

        let mut proposal = self.load(id).await?;
        if !proposal.is_pending() {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only pending proposals can be rejected",
                proposal.status
            )));
        }

        let now = self.clock.now();
        proposal.status = ProposalStatus::Rejected;
        proposal.reviewed_by = Some(reviewer.clone());
        proposal.review_reason = Some(reason.clone());

        let mut batch = WriteBatch::new();
        batch.audit(
            self.proposal_entry(&proposal, reviewer, AuditAction::ProposalRejected, now)
                .with_reason(reason.as_str()),
        );
        let proposal = self.persist(proposal, batch, now).await?;
        info!(proposal_id = %id, reviewer = %reviewer, reason = %reason, "Proposal rejected");
        Ok(proposal)
    }

    /// Withdraw a pending proposal. Only the requester may cancel.
    pub async fn cancel(&self, id: &ProposalId, requester: &UserId) -> Result<ChangeProposal> {
        let _guard = self.locks.lock(*id).await;

        let mut proposal = self.load(id).await?;
        if !proposal.is_pending() {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only pending proposals can be cancelled",
                proposal.status
            )));
        }
        if &proposal.requested_by != requester {
            return Err(GovernanceError::PermissionDenied {
                step: "requester".to_string(),
                reason: "only the requester may cancel a proposal".to_string(),
            });
        }

        let now = self.clock.now();
        proposal.status = ProposalStatus::Cancelled;
        proposal.reviewed_by = Some(requester.clone());

        let mut batch = WriteBatch::new();
        batch.audit(self.proposal_entry(&proposal, requester, AuditAction::ProposalCancelled, now));
        let proposal = self.persist(proposal, batch, now).await?;
        info!(proposal_id = %id, "Proposal cancelled");
        Ok(proposal)
    }

    /// Activate an approved proposal whose effective time has come.
    pub async fn activate_approved(
        &self,
        id: &ProposalId,
        actor: &UserId,
    ) -> Result<ChangeProposal> {
        let _guard = self.locks.lock(*id).await;

        let proposal = self.load(id).await?;
        if proposal.status != ProposalStatus::Approved {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only approved proposals can be activated",
                proposal.status
            )));
        }
        if !proposal.is_due(self.clock.now()) {
            return Err(GovernanceError::TooEarly(format!(
                "{id} takes effect at {}",
                proposal
                    .effective_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            )));
        }
        self.advance(proposal, actor, WriteBatch::new()).await
    }

    /// Import roles one by one: unknown names are created, existing names
    /// get an update proposal. A failing item never aborts the others.
    pub async fn bulk_apply(&self, items: &[Value], actor: &UserId) -> BulkResult {
        let mut result = BulkResult::default();

        for (index, raw) in items.iter().enumerate() {
            match self.apply_item(index, raw, actor).await {
                Ok(outcome) => {
                    result.imported += 1;
                    result.results.push(outcome);
                }
                Err(err) => {
                    debug!(index, error = %err, "Bulk item failed");
                    result.failed += 1;
                    result.errors.push(BulkItemError {
                        index,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            imported = result.imported,
            failed = result.failed,
            actor = %actor,
            "Bulk role import finished"
        );
        result
    }

    pub async fn get(&self, id: &ProposalId) -> Result<ChangeProposal> {
        self.load(id).await
    }

    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<ChangeProposal>> {
        Ok(self.store.list_proposals(status).await?)
    }

    async fn apply_item(&self, index: usize, raw: &Value, actor: &UserId) -> Result<BulkOutcome> {
        let item: BulkRoleItem = serde_json::from_value(raw.clone()).map_err(|err| {
            GovernanceError::validation(vec![FieldError::new("item", err.to_string())])
        })?;

        match self.entities.role_by_name(&item.draft.name).await? {
            None => {
                let role = self.entities.create_role(item.draft, actor).await?;
                Ok(BulkOutcome::Created { index, role })
            }
            Some(existing) => {
                let options = ProposalOptions {
                    justification: item.justification,
                    regulator_impact: item.regulator_impact,
                    ..ProposalOptions::default()
                };
                let proposal = self
                    .propose(
                        EntityRef::Role(existing.id),
                        actor,
                        DesiredState::Role(item.draft),
                        options,
                    )
                    .await?;
                Ok(BulkOutcome::Proposed {
                    index,
                    role_id: existing.id,
                    proposal: proposal.summary(),
                })
            }
        }
    }

    /// Drive a proposal whose approvals are complete as far as it can go.
    ///
    /// `proposal` is at its stored version; `batch` holds writes that must
    /// land with the transition.
    async fn advance(
        &self,
        proposal: ChangeProposal,
        actor: &UserId,
        batch: WriteBatch,
    ) -> Result<ChangeProposal> {
        let mut attempt = 1;
        loop {
            match self.try_advance(proposal.clone(), actor, batch.clone()).await {
                Err(GovernanceError::EmergencyBrake(reason)) if attempt < BRAKE_ATTEMPTS => {
                    debug!(
                        proposal_id = %proposal.id,
                        attempt,
                        reason = %reason,
                        "Emergency brake moved during commit, re-planning"
                    );
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_advance(
        &self,
        mut proposal: ChangeProposal,
        actor: &UserId,
        mut batch: WriteBatch,
    ) -> Result<ChangeProposal> {
        let now = self.clock.now();

        let brake = self.brake.status().await?;
        if brake.active {
            if proposal.emergency_blocked && batch.is_empty() {
                return Ok(proposal);
            }
            if !proposal.emergency_blocked {
                proposal.emergency_blocked = true;
                let mut entry =
                    self.proposal_entry(&proposal, actor, AuditAction::ProposalBlocked, now);
                if let Some(reason) = &brake.reason {
                    entry = entry.with_reason(reason.as_str());
                }
                batch.audit(entry);
            }
            warn!(
                proposal_id = %proposal.id,
                reason = brake.reason.as_deref().unwrap_or(""),
                "Activation blocked by emergency brake"
            );
            batch.require(Precondition::BrakeEngaged);
            return self.persist(proposal, batch, now).await;
        }

        proposal.emergency_blocked = false;
        proposal.status = ProposalStatus::Approved;

        if !proposal.is_due(now) {
            info!(
                proposal_id = %proposal.id,
                effective_at = ?proposal.effective_at,
                "Proposal approved, activation deferred"
            );
            return self.persist(proposal, batch, now).await;
        }

        let applied = self.executor.activate(&proposal, actor, batch).await?;
        Ok(applied.proposal)
    }

    /// Commit a proposal transition under a version check.
    async fn persist(
        &self,
        mut proposal: ChangeProposal,
        mut batch: WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<ChangeProposal> {
        let stored_version = proposal.version;
        proposal.version += 1;
        proposal.updated_at = now;

        batch
            .require(Precondition::ProposalVersion {
                id: proposal.id,
                version: stored_version,
            })
            .push(Write::PutProposal(proposal.clone()));

        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(Precondition::BrakeEngaged) => {
                GovernanceError::EmergencyBrake(format!(
                    "released before {} was held back",
                    proposal.id
                ))
            }
            StoreError::PreconditionFailed(_) => GovernanceError::InvalidState(format!(
                "{} changed concurrently; refresh and retry",
                proposal.id
            )),
            other => other.into(),
        })?;
        Ok(proposal)
    }

    async fn load(&self, id: &ProposalId) -> Result<ChangeProposal> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))
    }

    async fn load_target(
        &self,
        entity: EntityRef,
        desired: &DesiredState,
        options: &ProposalOptions,
    ) -> Result<Target> {
        match (entity, desired) {
            (EntityRef::Role(id), DesiredState::Role(draft)) => {
                let role = self.entities.role(&id).await?;

                let mut errors =
                    draft.validate(self.config.roles.min_level, self.config.roles.max_level);
                errors.extend(system_role_violations(&role, &draft.name, draft.level));
                if options.supersedes.is_some() {
                    errors.push(FieldError::new(
                        "supersedes",
                        "only pricing profiles can be superseded",
                    ));
                }
                if !errors.is_empty() {
                    return Err(GovernanceError::validation(errors));
                }

                if draft.name != role.name {
                    if let Some(other) = self.entities.role_by_name(&draft.name).await? {
                        return Err(GovernanceError::Conflict(format!(
                            "role name {} is already used by {}",
                            draft.name, other.id
                        )));
                    }
                }

                Ok(Target {
                    diff: role.diff_to(draft).map_err(diff_error)?,
                    base_version: role.version,
                    region_id: None,
                    service_key: None,
                })
            }
            (EntityRef::PricingProfile(id), DesiredState::PricingProfile(draft)) => {
                let profile = self.entities.profile(&id).await?;

                let errors = draft.validate(self.config.surge.max_multiplier);
                if !errors.is_empty() {
                    return Err(GovernanceError::validation(errors));
                }
                if let Some(old) = options.supersedes {
                    if old == id {
                        return Err(GovernanceError::validation(vec![FieldError::new(
                            "supersedes",
                            "a profile cannot supersede itself",
                        )]));
                    }
                    self.entities.profile(&old).await?;
                }

                Ok(Target {
                    diff: profile.diff_to(draft).map_err(diff_error)?,
                    base_version: profile.version,
                    region_id: Some(profile.region_id),
                    service_key: Some(profile.service_key),
                })
            }
            _ => Err(GovernanceError::validation(vec![FieldError::new(
                "desired_state",
                format!("expected a {} state", entity.kind()),
            )])),
        }
    }

    fn proposal_entry(
        &self,
        proposal: &ChangeProposal,
        actor: &UserId,
        action: AuditAction,
        now: DateTime<Utc>,
    ) -> AuditLogEntry {
        AuditLogEntry::new("change_proposal", proposal.id, actor.clone(), action, now)
            .with_scope(proposal.region_id.clone(), proposal.service_key.clone())
    }
}

impl std::fmt::Debug for ProposalWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposalWorkflow")
            .field("config", &self.config)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

struct Target {
    diff: ChangeDiff,
    base_version: u64,
    region_id: Option<RegionId>,
    service_key: Option<ServiceKey>,
}

fn diff_error(err: DiffError) -> GovernanceError {
    GovernanceError::validation(vec![FieldError::new("desired_state", err.to_string())])
}
