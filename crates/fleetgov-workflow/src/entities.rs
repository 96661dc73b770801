//! Direct creation of governed entities.
//!
//! New roles and pricing profiles are created without a proposal; every
//! later change to them goes through the proposal workflow.

use fleetgov_store::{GovernanceStore, Precondition, StoreError, Write, WriteBatch};
use fleetgov_types::{
    AuditAction, AuditLogEntry, FieldError, PricingProfile, ProfileDraft, ProfileId, RegionId,
    Role, RoleDraft, RoleId, ServiceKey, UserId,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};

pub struct EntityRegistry {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
}

impl EntityRegistry {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Create a non-system role.
    pub async fn create_role(&self, draft: RoleDraft, actor: &UserId) -> Result<Role> {
        let errors = draft.validate(self.config.roles.min_level, self.config.roles.max_level);
        if !errors.is_empty() {
            return Err(GovernanceError::validation(errors));
        }
        self.insert_role(Role::from_draft(draft, false, self.clock.now()), actor)
            .await
    }

    /// Install a system role. System roles are never renamed or re-levelled.
    pub async fn seed_system_role(&self, draft: RoleDraft, actor: &UserId) -> Result<Role> {
        if let Some(existing) = self.store.find_role_by_name(&draft.name).await? {
            return Ok(existing);
        }
        self.insert_role(Role::from_draft(draft, true, self.clock.now()), actor)
            .await
    }

    async fn insert_role(&self, role: Role, actor: &UserId) -> Result<Role> {
        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::RoleNameAvailable(role.name.clone()))
            .push(Write::InsertRole(role.clone()))
            .audit(
                AuditLogEntry::new(
                    "role",
                    role.id,
                    actor.clone(),
                    AuditAction::RoleCreated,
                    role.created_at,
                )
                .with_values(None, Some(json!(role.to_draft()))),
            );

        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(_) => GovernanceError::Conflict(format!(
                "role name {} is already in use",
                role.name
            )),
            other => other.into(),
        })?;

        info!(role_id = %role.id, name = %role.name, system = role.is_system, "Role created");
        Ok(role)
    }

    /// Create a pricing profile in `draft` status.
    pub async fn create_profile(
        &self,
        region_id: RegionId,
        service_key: ServiceKey,
        draft: ProfileDraft,
        actor: &UserId,
    ) -> Result<PricingProfile> {
        let mut errors = draft.validate(self.config.surge.max_multiplier);
        if region_id.as_str().trim().is_empty() {
            errors.push(FieldError::new("region_id", "must not be empty"));
        }
        if service_key.as_str().trim().is_empty() {
            errors.push(FieldError::new("service_key", "must not be empty"));
        }
        if !errors.is_empty() {
            return Err(GovernanceError::validation(errors));
        }

        let profile = PricingProfile::from_draft(region_id, service_key, draft, self.clock.now());
        let mut batch = WriteBatch::new();
        batch.push(Write::InsertProfile(profile.clone())).audit(
            AuditLogEntry::new(
                "pricing_profile",
                profile.id,
                actor.clone(),
                AuditAction::ProfileCreated,
                profile.created_at,
            )
            .with_values(None, Some(json!(profile.to_draft())))
            .with_scope(
                Some(profile.region_id.clone()),
                Some(profile.service_key.clone()),
            ),
        );
        self.store.commit(batch).await?;

        info!(
            profile_id = %profile.id,
            region = %profile.region_id,
            service = %profile.service_key,
            "Pricing profile created"
        );
        Ok(profile)
    }

    pub async fn role(&self, id: &RoleId) -> Result<Role> {
        self.store
            .get_role(id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))
    }

    pub async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.store.find_role_by_name(name).await?)
    }

    pub async fn roles(&self) -> Result<Vec<Role>> {
        Ok(self.store.list_roles().await?)
    }

    pub async fn profile(&self, id: &ProfileId) -> Result<PricingProfile> {
        self.store
            .get_profile(id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))
    }

    pub async fn profiles(&self, region: Option<&RegionId>) -> Result<Vec<PricingProfile>> {
        Ok(self.store.list_profiles(region).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use fleetgov_store::InMemoryGovernanceStore;

    fn registry() -> (EntityRegistry, Arc<InMemoryGovernanceStore>) {
        let store = Arc::new(InMemoryGovernanceStore::new());
        let registry = EntityRegistry::new(
            store.clone(),
            Arc::new(SystemClock),
            Arc::new(GovernanceConfig::default()),
        );
        (registry, store)
    }

    #[tokio::test]
    async fn duplicate_role_names_conflict() {
        let (registry, store) = registry();
        let actor = UserId::new("admin");
        registry
            .create_role(RoleDraft::new("dispatcher", 20), &actor)
            .await
            .unwrap();
        let err = registry
            .create_role(RoleDraft::new("dispatcher", 30), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
        assert_eq!(store.audit_len(), 1);
    }

    #[tokio::test]
    async fn invalid_role_reports_fields() {
        let (registry, _) = registry();
        let err = registry
            .create_role(RoleDraft::new("", 500), &UserId::new("admin"))
            .await
            .unwrap_err();
        match err {
            GovernanceError::ValidationFailed { errors } => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["name", "level"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn seeding_a_system_role_is_idempotent() {
        let (registry, _) = registry();
        let actor = UserId::new("bootstrap");
        let first = registry
            .seed_system_role(RoleDraft::new("super_admin", 100), &actor)
            .await
            .unwrap();
        let second = registry
            .seed_system_role(RoleDraft::new("super_admin", 100), &actor)
            .await
            .unwrap();
        assert!(first.is_system);
        assert_eq!(first.id, second.id);
    }
}
