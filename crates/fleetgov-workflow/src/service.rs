//! Policy-gated entry point to the governance core.
//!
//! Every operation a user can trigger is authorized here before it reaches
//! the workflow components. The components themselves trust their caller.
//! Scheduled sweeps run on behalf of a trigger identity and are not gated.

use dashmap::DashMap;
use fleetgov_policy::{actions, PolicyEngine, ResourceContext};
use fleetgov_store::GovernanceStore;
use fleetgov_types::{
    AuditLogEntry, AuditQuery, BrakeState, ChangeProposal, DesiredState, EntityKind, EntityRef,
    PricingProfile, ProfileDraft, ProfileId, ProposalId, ProposalStatus, RegionId, RegionState,
    Role, RoleDraft, RoleId, ScheduleDraft, ScheduleId, ScheduleStatus, ServiceKey,
    SurgeSchedule, User, UserId,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::AuditTrail;
use crate::brake::EmergencyBrake;
use crate::clock::{Clock, SystemClock};
use crate::config::GovernanceConfig;
use crate::entities::EntityRegistry;
use crate::error::{GovernanceError, Result};
use crate::proposals::{BulkResult, ProposalOptions, ProposalWorkflow};
use crate::runner::{ActivationResult, ScheduledActivationRunner, SweepReport};
use crate::schedules::ScheduleBook;

/// Builder for [`GovernanceService`].
pub struct GovernanceServiceBuilder {
    store: Arc<dyn GovernanceStore>,
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    policy: PolicyEngine,
}

impl GovernanceServiceBuilder {
    pub fn with_config(mut self, config: GovernanceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> GovernanceService {
        let Self {
            store,
            config,
            clock,
            policy,
        } = self;
        let config = Arc::new(config);

        let audit = AuditTrail::new(store.clone(), clock.clone());
        let brake = Arc::new(EmergencyBrake::new(store.clone(), audit.clone()));
        let entities = Arc::new(EntityRegistry::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let proposals = Arc::new(ProposalWorkflow::new(
            store.clone(),
            clock.clone(),
            config.clone(),
            brake.clone(),
            entities.clone(),
        ));
        let schedules = ScheduleBook::new(store.clone(), clock.clone(), config.clone());
        let runner =
            ScheduledActivationRunner::new(store, clock, config.clone(), proposals.clone());

        GovernanceService {
            policy,
            config,
            audit,
            brake,
            entities,
            proposals,
            schedules,
            runner,
            region_states: DashMap::new(),
        }
    }
}

/// Governance core behind one policy engine.
pub struct GovernanceService {
    policy: PolicyEngine,
    config: Arc<GovernanceConfig>,
    audit: AuditTrail,
    brake: Arc<EmergencyBrake>,
    entities: Arc<EntityRegistry>,
    proposals: Arc<ProposalWorkflow>,
    schedules: ScheduleBook,
    runner: ScheduledActivationRunner,
    region_states: DashMap<RegionId, RegionState>,
}

impl GovernanceService {
    /// Start building a service over `store` with default configuration,
    /// the system clock and the default policy engine.
    pub fn builder(store: Arc<dyn GovernanceStore>) -> GovernanceServiceBuilder {
        GovernanceServiceBuilder {
            store,
            config: GovernanceConfig::default(),
            clock: Arc::new(SystemClock),
            policy: PolicyEngine::new(),
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn brake(&self) -> &EmergencyBrake {
        &self.brake
    }

    /// Record the lifecycle state of a region, used by region-aware policy steps.
    pub fn set_region_state(&self, region: RegionId, state: RegionState) {
        self.region_states.insert(region, state);
    }

    pub fn region_state(&self, region: &RegionId) -> Option<RegionState> {
        self.region_states.get(region).map(|state| *state)
    }

    // Roles

    pub async fn create_role(&self, user: &User, draft: RoleDraft) -> Result<Role> {
        self.authorize(user, actions::ROLES_CREATE, None)?;
        self.entities.create_role(draft, &user.user_id).await
    }

    /// Install a system role during bootstrap.
    pub async fn seed_system_role(&self, draft: RoleDraft, actor: &UserId) -> Result<Role> {
        self.entities.seed_system_role(draft, actor).await
    }

    pub async fn get_role(&self, user: &User, id: &RoleId) -> Result<Role> {
        self.authorize(user, actions::ROLES_READ, None)?;
        self.entities.role(id).await
    }

    pub async fn list_roles(&self, user: &User) -> Result<Vec<Role>> {
        self.authorize(user, actions::ROLES_READ, None)?;
        self.entities.roles().await
    }

    pub async fn propose_role_change(
        &self,
        user: &User,
        role: RoleId,
        desired: RoleDraft,
        options: ProposalOptions,
    ) -> Result<ChangeProposal> {
        self.authorize(user, actions::ROLES_PROPOSE, None)?;
        self.proposals
            .propose(
                EntityRef::Role(role),
                &user.user_id,
                DesiredState::Role(desired),
                options,
            )
            .await
    }

    /// Import a list of role definitions. The status of the result tells
    /// whether any item was applied.
    pub async fn bulk_import_roles(&self, user: &User, items: &[Value]) -> Result<BulkResult> {
        self.authorize(user, actions::ROLES_IMPORT, None)?;
        Ok(self.proposals.bulk_apply(items, &user.user_id).await)
    }

    // Pricing profiles

    pub async fn create_profile(
        &self,
        user: &User,
        region: RegionId,
        service: ServiceKey,
        draft: ProfileDraft,
    ) -> Result<PricingProfile> {
        let resource = self.resource(&region);
        self.authorize(user, actions::PRICING_CREATE, Some(&resource))?;
        self.entities
            .create_profile(region, service, draft, &user.user_id)
            .await
    }

    pub async fn get_profile(&self, user: &User, id: &ProfileId) -> Result<PricingProfile> {
        let profile = self.entities.profile(id).await?;
        let resource = self.resource(&profile.region_id);
        self.authorize(user, actions::PRICING_READ, Some(&resource))?;
        Ok(profile)
    }

    pub async fn list_profiles(
        &self,
        user: &User,
        region: &RegionId,
    ) -> Result<Vec<PricingProfile>> {
        let resource = self.resource(region);
        self.authorize(user, actions::PRICING_READ, Some(&resource))?;
        self.entities.profiles(Some(region)).await
    }

    pub async fn propose_profile_change(
        &self,
        user: &User,
        profile: ProfileId,
        desired: ProfileDraft,
        options: ProposalOptions,
    ) -> Result<ChangeProposal> {
        let current = self.entities.profile(&profile).await?;
        let resource = self.resource(&current.region_id);
        self.authorize(user, actions::PRICING_PROPOSE, Some(&resource))?;
        self.proposals
            .propose(
                EntityRef::PricingProfile(profile),
                &user.user_id,
                DesiredState::PricingProfile(desired),
                options,
            )
            .await
    }

    // Proposals

    pub async fn approve_proposal(&self, user: &User, id: &ProposalId) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Approve)?;
        self.proposals.approve(id, &user.user_id).await
    }

    pub async fn reject_proposal(
        &self,
        user: &User,
        id: &ProposalId,
        reason: &str,
    ) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Approve)?;
        self.proposals.reject(id, &user.user_id, reason).await
    }

    pub async fn cancel_proposal(&self, user: &User, id: &ProposalId) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Propose)?;
        self.proposals.cancel(id, &user.user_id).await
    }

    /// Re-evaluate one blocked proposal.
    pub async fn recheck_proposal(&self, user: &User, id: &ProposalId) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Approve)?;
        self.proposals.recheck(id, &user.user_id).await
    }

    /// Apply an approved proposal whose effective time has come.
    pub async fn activate_proposal(&self, user: &User, id: &ProposalId) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Approve)?;
        self.proposals.activate_approved(id, &user.user_id).await
    }

    pub async fn get_proposal(&self, user: &User, id: &ProposalId) -> Result<ChangeProposal> {
        let proposal = self.proposals.get(id).await?;
        self.authorize_proposal(user, &proposal, Gate::Read)?;
        Ok(proposal)
    }

    /// Proposals the user may read, optionally by status.
    pub async fn list_proposals(
        &self,
        user: &User,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<ChangeProposal>> {
        let proposals = self.proposals.list(status).await?;
        Ok(proposals
            .into_iter()
            .filter(|proposal| {
                let action = Gate::Read.action(proposal.entity.kind());
                let resource = proposal.region_id.as_ref().map(|r| self.resource(r));
                self.policy
                    .authorize(user, action, resource.as_ref())
                    .is_allowed()
            })
            .collect())
    }

    // Surge schedules

    pub async fn create_schedule(&self, user: &User, draft: ScheduleDraft) -> Result<SurgeSchedule> {
        let resource = self.resource(&draft.region_id);
        self.authorize(user, actions::SURGE_SCHEDULE, Some(&resource))?;
        self.schedules.create(draft, &user.user_id).await
    }

    pub async fn approve_schedule(&self, user: &User, id: &ScheduleId) -> Result<SurgeSchedule> {
        let schedule = self.schedules.get(id).await?;
        let resource = self.resource(&schedule.region_id);
        self.authorize(user, actions::SURGE_APPROVE, Some(&resource))?;
        self.schedules.approve(id, &user.user_id).await
    }

    pub async fn get_schedule(&self, user: &User, id: &ScheduleId) -> Result<SurgeSchedule> {
        let schedule = self.schedules.get(id).await?;
        let resource = self.resource(&schedule.region_id);
        self.authorize(user, actions::PRICING_READ, Some(&resource))?;
        Ok(schedule)
    }

    pub async fn list_schedules(
        &self,
        user: &User,
        status: Option<ScheduleStatus>,
    ) -> Result<Vec<SurgeSchedule>> {
        self.authorize(user, actions::PRICING_READ, None)?;
        self.schedules.list(status).await
    }

    /// Promote one schedule on behalf of a user.
    pub async fn promote_schedule(&self, user: &User, id: &ScheduleId) -> Result<ActivationResult> {
        let schedule = self.schedules.get(id).await?;
        let resource = self.resource(&schedule.region_id);
        self.authorize(user, actions::SURGE_PROMOTE, Some(&resource))?;
        self.runner.promote(id, &user.user_id).await
    }

    // Scheduled triggers

    pub async fn trigger_promotion(
        &self,
        id: &ScheduleId,
        trigger: &UserId,
    ) -> Result<ActivationResult> {
        self.runner.promote(id, trigger).await
    }

    pub async fn promote_due(&self, trigger: &UserId) -> Result<SweepReport<ActivationResult>> {
        self.runner.promote_due(trigger).await
    }

    pub async fn expire_due(&self, trigger: &UserId) -> Result<SweepReport<ScheduleId>> {
        self.runner.expire_due(trigger).await
    }

    pub async fn activate_due_proposals(
        &self,
        trigger: &UserId,
    ) -> Result<SweepReport<ProposalId>> {
        self.runner.activate_due_proposals(trigger).await
    }

    // Emergency brake

    /// The shared brake position, read from the store.
    pub async fn brake_status(&self) -> Result<BrakeState> {
        self.brake.status().await
    }

    pub async fn engage_brake(&self, user: &User, reason: &str) -> Result<BrakeState> {
        self.authorize(user, actions::EMERGENCY_BRAKE, None)?;
        self.brake.engage(&user.user_id, reason).await
    }

    /// Release the brake and re-check every proposal it held back.
    ///
    /// Returns the proposals that were re-evaluated.
    pub async fn release_brake(&self, user: &User) -> Result<(BrakeState, Vec<ChangeProposal>)> {
        self.authorize(user, actions::EMERGENCY_BRAKE, None)?;
        let state = self.brake.release(&user.user_id).await?;
        let reevaluated = self.proposals.reevaluate_blocked(&user.user_id).await?;
        Ok((state, reevaluated))
    }

    // Audit

    pub async fn query_audit(&self, user: &User, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        let resource = query.region_id.as_ref().map(|region| self.resource(region));
        self.authorize(user, actions::AUDIT_READ, resource.as_ref())?;
        self.audit.query(query).await
    }

    /// Authorize `action`, logging the decision.
    pub fn authorize(
        &self,
        user: &User,
        action: &str,
        resource: Option<&ResourceContext>,
    ) -> Result<()> {
        let decision = self.policy.authorize(user, action, resource);
        match decision.denied_at() {
            Some(step) => {
                warn!(
                    user = %user.user_id,
                    action,
                    step = %step,
                    reason = %decision.reason,
                    "Authorization denied"
                );
                Err(GovernanceError::denied(step, decision.reason))
            }
            None => {
                debug!(user = %user.user_id, action, "Authorization granted");
                Ok(())
            }
        }
    }

    fn authorize_proposal(&self, user: &User, proposal: &ChangeProposal, gate: Gate) -> Result<()> {
        let resource = proposal.region_id.as_ref().map(|r| self.resource(r));
        self.authorize(user, gate.action(proposal.entity.kind()), resource.as_ref())
    }

    fn resource(&self, region: &RegionId) -> ResourceContext {
        let context = ResourceContext::region(region.clone());
        match self.region_state(region) {
            Some(state) => context.with_region_state(state),
            None => context,
        }
    }
}

impl std::fmt::Debug for GovernanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceService")
            .field("policy", &self.policy)
            .field("brake", &self.brake.last_observed())
            .field("regions", &self.region_states.len())
            .finish_non_exhaustive()
    }
}

/// Permission family for an operation on a proposal.
#[derive(Debug, Clone, Copy)]
enum Gate {
    Read,
    Propose,
    Approve,
}

impl Gate {
    fn action(self, kind: EntityKind) -> &'static str {
        match (self, kind) {
            (Self::Read, EntityKind::Role) => actions::ROLES_READ,
            (Self::Read, EntityKind::PricingProfile) => actions::PRICING_READ,
            (Self::Propose, EntityKind::Role) => actions::ROLES_PROPOSE,
            (Self::Propose, EntityKind::PricingProfile) => actions::PRICING_PROPOSE,
            (Self::Approve, EntityKind::Role) => actions::ROLES_APPROVE,
            (Self::Approve, EntityKind::PricingProfile) => actions::PRICING_APPROVE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgov_store::InMemoryGovernanceStore;

    fn service() -> GovernanceService {
        GovernanceService::builder(Arc::new(InMemoryGovernanceStore::new())).build()
    }

    #[test]
    fn approval_gate_follows_entity_kind() {
        assert_eq!(Gate::Approve.action(EntityKind::Role), actions::ROLES_APPROVE);
        assert_eq!(
            Gate::Approve.action(EntityKind::PricingProfile),
            actions::PRICING_APPROVE
        );
        assert_eq!(Gate::Propose.action(EntityKind::Role), actions::ROLES_PROPOSE);
    }

    #[test]
    fn resource_carries_known_region_state() {
        let service = service();
        let region = RegionId::new("kisumu");
        assert_eq!(service.resource(&region).region_state, None);

        service.set_region_state(region.clone(), RegionState::Pilot);
        assert_eq!(
            service.resource(&region).region_state,
            Some(RegionState::Pilot)
        );
    }

    #[tokio::test]
    async fn missing_permission_is_denied_at_rbac() {
        let service = service();
        let user = User::new("ops-1", "support", 10);
        let err = service
            .create_role(&user, RoleDraft::new("dispatcher", 20))
            .await
            .unwrap_err();
        assert_eq!(err.denied_step(), Some("rbac"));
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn brake_requires_permission() {
        let service = service();
        let user = User::new("ops-1", "support", 10);
        assert!(service.engage_brake(&user, "incident").await.is_err());
        assert!(!service.brake_status().await.unwrap().active);

        let admin = User::new("admin", "super_admin", 100)
            .with_permission(actions::EMERGENCY_BRAKE);
        let state = service.engage_brake(&admin, "incident").await.unwrap();
        assert!(state.active);
    }
}
