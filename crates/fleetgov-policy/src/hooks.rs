//! Pluggable hooks consulted by the sensitivity and override steps.

use fleetgov_types::User;

use crate::context::ResourceContext;

/// Source of step-up (MFA) verification state.
///
/// Sensitive actions are denied unless the verifier reports a completed
/// step-up for the user and action.
pub trait StepUpVerifier: Send + Sync {
    fn is_verified(&self, user: &User, action: &str) -> bool;
}

/// Default verifier: no step-up verification is ever reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStepUpVerification;

impl StepUpVerifier for NoStepUpVerification {
    fn is_verified(&self, _user: &User, _action: &str) -> bool {
        false
    }
}

/// Result of the override hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideOutcome {
    /// Fall through to the remaining steps
    Continue,
    /// Deny with the given reason
    Deny(String),
}

/// Extension point for cross-scope emergency access grants and revocations.
pub trait OverrideHook: Send + Sync {
    fn evaluate(
        &self,
        user: &User,
        action: &str,
        resource: Option<&ResourceContext>,
    ) -> OverrideOutcome;
}

/// Default hook: no overrides are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl OverrideHook for NoOverrides {
    fn evaluate(
        &self,
        _user: &User,
        _action: &str,
        _resource: Option<&ResourceContext>,
    ) -> OverrideOutcome {
        OverrideOutcome::Continue
    }
}
