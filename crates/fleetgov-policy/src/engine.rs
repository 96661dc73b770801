//! Policy engine
//!
//! Runs the five stages strictly in order; the first denial short-circuits
//! and is reported with its step. The engine performs no I/O and does not
//! log; callers record decisions.

use std::sync::Arc;

use fleetgov_types::User;

use crate::action::ActionCatalog;
use crate::context::{AuthorizationRequest, ResourceContext};
use crate::decision::AuthorizationDecision;
use crate::error::{PolicyError, Result};
use crate::hooks::{NoOverrides, NoStepUpVerification, OverrideHook, StepUpVerifier};
use crate::stages::{
    ExpansionScopeStage, OverrideStage, PolicyStage, RbacStage, RegionalScopeStage,
    SensitivityStage, StageResult,
};

/// Authorization engine.
pub struct PolicyEngine {
    stages: Vec<Box<dyn PolicyStage>>,
    catalog: ActionCatalog,
}

impl PolicyEngine {
    /// Engine with the governance action catalog and default hooks.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PolicyEngineBuilder {
        PolicyEngineBuilder::default()
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Evaluate `action` for `user` against an optional resource.
    pub fn authorize(
        &self,
        user: &User,
        action: &str,
        resource: Option<&ResourceContext>,
    ) -> AuthorizationDecision {
        let request = AuthorizationRequest {
            user,
            action,
            resource,
            sensitivity: self.catalog.sensitivity(action),
        };

        for stage in &self.stages {
            if let StageResult::Deny(reason) = stage.evaluate(&request) {
                return AuthorizationDecision::deny(stage.step(), reason);
            }
        }

        AuthorizationDecision::allow()
    }

    /// Like [`authorize`](Self::authorize) but turns a denial into an error.
    pub fn require(
        &self,
        user: &User,
        action: &str,
        resource: Option<&ResourceContext>,
    ) -> Result<AuthorizationDecision> {
        let decision = self.authorize(user, action, resource);
        match decision.denied_at() {
            Some(step) => Err(PolicyError::Denied {
                step,
                reason: decision.reason,
            }),
            None => Ok(decision),
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.step()).collect::<Vec<_>>(),
            )
            .field("actions", &self.catalog.len())
            .finish()
    }
}

/// Builder for [`PolicyEngine`].
///
/// The stage order is fixed; only the hooks and catalog are configurable.
pub struct PolicyEngineBuilder {
    catalog: ActionCatalog,
    verifier: Arc<dyn StepUpVerifier>,
    override_hook: Arc<dyn OverrideHook>,
}

impl Default for PolicyEngineBuilder {
    fn default() -> Self {
        Self {
            catalog: ActionCatalog::governance(),
            verifier: Arc::new(NoStepUpVerification),
            override_hook: Arc::new(NoOverrides),
        }
    }
}

impl PolicyEngineBuilder {
    pub fn with_catalog(mut self, catalog: ActionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_step_up_verifier(mut self, verifier: Arc<dyn StepUpVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_override_hook(mut self, hook: Arc<dyn OverrideHook>) -> Self {
        self.override_hook = hook;
        self
    }

    pub fn build(self) -> PolicyEngine {
        PolicyEngine {
            stages: vec![
                Box::new(RbacStage),
                Box::new(RegionalScopeStage),
                Box::new(SensitivityStage::new(self.verifier)),
                Box::new(OverrideStage::new(self.override_hook)),
                Box::new(ExpansionScopeStage),
            ],
            catalog: self.catalog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::actions;
    use crate::decision::PolicyStep;
    use crate::hooks::OverrideOutcome;
    use fleetgov_types::RegionState;

    fn analyst() -> User {
        User::new("u-1", "pricing_analyst", 30)
            .with_permissions([actions::PRICING_PROPOSE, actions::USERS_PII_READ])
            .with_region("nyc")
    }

    struct VerifiedFor(&'static str);

    impl StepUpVerifier for VerifiedFor {
        fn is_verified(&self, user: &User, _action: &str) -> bool {
            user.user_id.as_str() == self.0
        }
    }

    struct DenyRegion(&'static str);

    impl OverrideHook for DenyRegion {
        fn evaluate(
            &self,
            _user: &User,
            _action: &str,
            resource: Option<&ResourceContext>,
        ) -> OverrideOutcome {
            match resource.and_then(|r| r.region_id.as_ref()) {
                Some(region) if region.as_str() == self.0 => {
                    OverrideOutcome::Deny("region frozen".into())
                }
                _ => OverrideOutcome::Continue,
            }
        }
    }

    #[test]
    fn allows_when_every_step_passes() {
        let engine = PolicyEngine::new();
        let decision = engine.authorize(
            &analyst(),
            actions::PRICING_PROPOSE,
            Some(&ResourceContext::region("nyc")),
        );
        assert!(decision.is_allowed());
        assert_eq!(decision.step, None);
    }

    #[test]
    fn rbac_is_checked_before_region() {
        let engine = PolicyEngine::new();
        let decision = engine.authorize(
            &analyst(),
            actions::PRICING_APPROVE,
            Some(&ResourceContext::region("sfo")),
        );
        assert_eq!(decision.denied_at(), Some(PolicyStep::Rbac));
    }

    #[test]
    fn region_outside_assignment_is_regional() {
        let engine = PolicyEngine::new();
        let decision = engine.authorize(
            &analyst(),
            actions::PRICING_PROPOSE,
            Some(&ResourceContext::region("sfo")),
        );
        assert_eq!(decision.denied_at(), Some(PolicyStep::Regional));
    }

    #[test]
    fn pii_requires_step_up() {
        let engine = PolicyEngine::new();
        let decision = engine.authorize(&analyst(), actions::USERS_PII_READ, None);
        assert_eq!(decision.denied_at(), Some(PolicyStep::Sensitivity));

        let engine = PolicyEngine::builder()
            .with_step_up_verifier(Arc::new(VerifiedFor("u-1")))
            .build();
        assert!(engine
            .authorize(&analyst(), actions::USERS_PII_READ, None)
            .is_allowed());
    }

    #[test]
    fn override_hook_can_deny() {
        let engine = PolicyEngine::builder()
            .with_override_hook(Arc::new(DenyRegion("nyc")))
            .build();
        let decision = engine.authorize(
            &analyst(),
            actions::PRICING_PROPOSE,
            Some(&ResourceContext::region("nyc")),
        );
        assert_eq!(decision.denied_at(), Some(PolicyStep::Override));
        assert_eq!(decision.reason, "region frozen");
    }

    #[test]
    fn expansion_manager_limited_to_early_regions() {
        let engine = PolicyEngine::new();
        let manager = User::new("u-2", "expansion_manager", 40)
            .with_permission(actions::PRICING_PROPOSE)
            .with_region("austin");

        let pilot = ResourceContext::region("austin").with_region_state(RegionState::Pilot);
        assert!(engine
            .authorize(&manager, actions::PRICING_PROPOSE, Some(&pilot))
            .is_allowed());

        let active = ResourceContext::region("austin").with_region_state(RegionState::Active);
        assert_eq!(
            engine
                .authorize(&manager, actions::PRICING_PROPOSE, Some(&active))
                .denied_at(),
            Some(PolicyStep::ExpansionScope)
        );
    }

    #[test]
    fn require_returns_denied_error() {
        let engine = PolicyEngine::new();
        let err = engine
            .require(&analyst(), actions::AUDIT_READ, None)
            .unwrap_err();
        assert_eq!(
            err,
            PolicyError::Denied {
                step: PolicyStep::Rbac,
                reason: "Missing permission: audit:read".into(),
            }
        );
    }
}
