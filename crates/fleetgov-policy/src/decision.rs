//! Authorization decisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named step of the authorization pipeline, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStep {
    Rbac,
    Regional,
    Sensitivity,
    Override,
    ExpansionScope,
}

impl PolicyStep {
    pub const ORDER: [PolicyStep; 5] = [
        Self::Rbac,
        Self::Regional,
        Self::Sensitivity,
        Self::Override,
        Self::ExpansionScope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rbac => "rbac",
            Self::Regional => "regional",
            Self::Sensitivity => "sensitivity",
            Self::Override => "override",
            Self::ExpansionScope => "expansion_scope",
        }
    }
}

impl fmt::Display for PolicyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `PolicyEngine::authorize`.
///
/// A denial always names the step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<PolicyStep>,
    pub reason: String,
}

impl AuthorizationDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            step: None,
            reason: "All policy checks passed".to_string(),
        }
    }

    pub fn deny(step: PolicyStep, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            step: Some(step),
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// The failing step, if denied.
    pub fn denied_at(&self) -> Option<PolicyStep> {
        if self.allowed {
            None
        } else {
            self.step
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_serializes_step_name() {
        let denial = AuthorizationDecision::deny(PolicyStep::ExpansionScope, "nope");
        let value = serde_json::to_value(&denial).unwrap();
        assert_eq!(value["step"], "expansion_scope");
        assert_eq!(value["allowed"], false);

        let allow = serde_json::to_value(AuthorizationDecision::allow()).unwrap();
        assert!(allow.get("step").is_none());
    }

    #[test]
    fn steps_are_ordered() {
        let mut sorted = PolicyStep::ORDER;
        sorted.sort();
        assert_eq!(sorted, PolicyStep::ORDER);
    }
}
