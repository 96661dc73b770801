//! The five authorization stages.

use std::sync::Arc;

use crate::context::AuthorizationRequest;
use crate::decision::PolicyStep;
use crate::hooks::{OverrideHook, OverrideOutcome, StepUpVerifier};

/// Result of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Pass,
    Deny(String),
}

/// A stage of the authorization pipeline.
///
/// Stages are synchronous and must not perform I/O.
pub trait PolicyStage: Send + Sync {
    fn step(&self) -> PolicyStep;

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult;
}

/// Step 1: the action must be in the user's permission set.
#[derive(Debug, Default)]
pub struct RbacStage;

impl PolicyStage for RbacStage {
    fn step(&self) -> PolicyStep {
        PolicyStep::Rbac
    }

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult {
        if request.user.has_permission(request.action) {
            StageResult::Pass
        } else {
            StageResult::Deny(format!("Missing permission: {}", request.action))
        }
    }
}

/// Step 2: a targeted region must be one the user is assigned to.
#[derive(Debug, Default)]
pub struct RegionalScopeStage;

impl PolicyStage for RegionalScopeStage {
    fn step(&self) -> PolicyStep {
        PolicyStep::Regional
    }

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult {
        match request.region_id() {
            Some(region) if !request.user.can_access_region(region) => StageResult::Deny(
                format!("Region {} is outside the user's allowed regions", region),
            ),
            _ => StageResult::Pass,
        }
    }
}

/// Step 3: PII and unmask actions require a completed step-up verification.
pub struct SensitivityStage {
    verifier: Arc<dyn StepUpVerifier>,
}

impl SensitivityStage {
    pub fn new(verifier: Arc<dyn StepUpVerifier>) -> Self {
        Self { verifier }
    }
}

impl PolicyStage for SensitivityStage {
    fn step(&self) -> PolicyStep {
        PolicyStep::Sensitivity
    }

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult {
        if !request.sensitivity.requires_step_up() {
            return StageResult::Pass;
        }
        if self.verifier.is_verified(request.user, request.action) {
            StageResult::Pass
        } else {
            StageResult::Deny(format!(
                "Action {} requires step-up verification",
                request.action
            ))
        }
    }
}

/// Step 4: consults the configured override hook.
pub struct OverrideStage {
    hook: Arc<dyn OverrideHook>,
}

impl OverrideStage {
    pub fn new(hook: Arc<dyn OverrideHook>) -> Self {
        Self { hook }
    }
}

impl PolicyStage for OverrideStage {
    fn step(&self) -> PolicyStep {
        PolicyStep::Override
    }

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult {
        match self
            .hook
            .evaluate(request.user, request.action, request.resource)
        {
            OverrideOutcome::Continue => StageResult::Pass,
            OverrideOutcome::Deny(reason) => StageResult::Deny(reason),
        }
    }
}

/// Step 5: expansion managers only act in prospect or pilot regions.
#[derive(Debug, Default)]
pub struct ExpansionScopeStage;

impl PolicyStage for ExpansionScopeStage {
    fn step(&self) -> PolicyStep {
        PolicyStep::ExpansionScope
    }

    fn evaluate(&self, request: &AuthorizationRequest<'_>) -> StageResult {
        if !request.user.is_expansion_manager() {
            return StageResult::Pass;
        }
        match request.region_state() {
            Some(state) if !state.is_expansion_stage() => StageResult::Deny(format!(
                "Expansion managers may only act in prospect or pilot regions (region is {})",
                state.as_str()
            )),
            _ => StageResult::Pass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Sensitivity;
    use crate::context::ResourceContext;
    use crate::hooks::NoStepUpVerification;
    use fleetgov_types::{RegionState, User};

    fn request<'a>(
        user: &'a User,
        action: &'a str,
        resource: Option<&'a ResourceContext>,
    ) -> AuthorizationRequest<'a> {
        AuthorizationRequest {
            user,
            action,
            resource,
            sensitivity: Sensitivity::infer(action),
        }
    }

    #[test]
    fn regional_passes_without_region() {
        let user = User::new("u", "ops", 10);
        assert_eq!(
            RegionalScopeStage.evaluate(&request(&user, "x", None)),
            StageResult::Pass
        );
        let resource = ResourceContext::new().with_region_state(RegionState::Active);
        assert_eq!(
            RegionalScopeStage.evaluate(&request(&user, "x", Some(&resource))),
            StageResult::Pass
        );
    }

    #[test]
    fn sensitivity_denies_by_default() {
        let user = User::new("u", "support", 10).with_permission("users:pii:read");
        let stage = SensitivityStage::new(Arc::new(NoStepUpVerification));
        assert!(matches!(
            stage.evaluate(&request(&user, "users:pii:read", None)),
            StageResult::Deny(_)
        ));
        assert_eq!(
            stage.evaluate(&request(&user, "users:read", None)),
            StageResult::Pass
        );
    }

    #[test]
    fn expansion_scope_ignores_other_roles() {
        let user = User::new("u", "city_manager", 10);
        let resource = ResourceContext::region("nyc").with_region_state(RegionState::Active);
        assert_eq!(
            ExpansionScopeStage.evaluate(&request(&user, "x", Some(&resource))),
            StageResult::Pass
        );
    }
}
