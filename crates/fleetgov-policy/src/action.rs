//! Governance actions and their sensitivity tags.
//!
//! Every action is a permission string. Actions that touch personal data
//! carry an explicit sensitivity tag; actions not registered in the catalog
//! are classified from their name so that any `pii` or `unmask` action stays
//! behind the sensitivity gate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PolicyError, Result};

/// Permission strings checked by the governance core.
pub mod actions {
    pub const ROLES_READ: &str = "roles:read";
    pub const ROLES_CREATE: &str = "roles:create";
    pub const ROLES_PROPOSE: &str = "roles:propose";
    pub const ROLES_APPROVE: &str = "roles:approve";
    pub const ROLES_IMPORT: &str = "roles:import";

    pub const PRICING_READ: &str = "pricing:read";
    pub const PRICING_CREATE: &str = "pricing:create";
    pub const PRICING_PROPOSE: &str = "pricing:propose";
    pub const PRICING_APPROVE: &str = "pricing:approve";

    pub const SURGE_SCHEDULE: &str = "surge:schedule";
    pub const SURGE_APPROVE: &str = "surge:approve";
    pub const SURGE_PROMOTE: &str = "surge:promote";

    pub const EMERGENCY_BRAKE: &str = "governance:emergency_brake";
    pub const AUDIT_READ: &str = "audit:read";

    pub const USERS_PII_READ: &str = "users:pii:read";
    pub const USERS_UNMASK: &str = "users:unmask";
}

/// Sensitivity class of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Standard,
    /// Reads personal data
    Pii,
    /// Reveals masked personal data
    Unmask,
}

impl Sensitivity {
    /// Classification implied by an action name.
    pub fn infer(action: &str) -> Self {
        if action.contains("unmask") {
            Self::Unmask
        } else if action.contains("pii") {
            Self::Pii
        } else {
            Self::Standard
        }
    }

    pub fn requires_step_up(&self) -> bool {
        !matches!(self, Self::Standard)
    }
}

/// Registered action definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, sensitivity: Sensitivity) -> Self {
        Self {
            name: name.into(),
            sensitivity,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Catalog of known actions.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    actions: HashMap<String, ActionDefinition>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every action the governance core checks.
    pub fn governance() -> Self {
        use actions::*;

        let mut catalog = Self::new();
        let standard = [
            ROLES_READ,
            ROLES_CREATE,
            ROLES_PROPOSE,
            ROLES_APPROVE,
            ROLES_IMPORT,
            PRICING_READ,
            PRICING_CREATE,
            PRICING_PROPOSE,
            PRICING_APPROVE,
            SURGE_SCHEDULE,
            SURGE_APPROVE,
            SURGE_PROMOTE,
            EMERGENCY_BRAKE,
            AUDIT_READ,
        ];
        for name in standard {
            catalog
                .actions
                .insert(name.to_string(), ActionDefinition::new(name, Sensitivity::Standard));
        }
        catalog.actions.insert(
            USERS_PII_READ.to_string(),
            ActionDefinition::new(USERS_PII_READ, Sensitivity::Pii)
                .with_description("Read rider and driver personal data"),
        );
        catalog.actions.insert(
            USERS_UNMASK.to_string(),
            ActionDefinition::new(USERS_UNMASK, Sensitivity::Unmask)
                .with_description("Reveal masked contact details"),
        );
        catalog
    }

    /// Register an action.
    ///
    /// A name that reads as a PII or unmask action cannot be registered as
    /// standard.
    pub fn register(&mut self, definition: ActionDefinition) -> Result<()> {
        let implied = Sensitivity::infer(&definition.name);
        if implied.requires_step_up() && !definition.sensitivity.requires_step_up() {
            return Err(PolicyError::InvalidConfiguration {
                reason: format!(
                    "action {} names personal data but is tagged standard",
                    definition.name
                ),
            });
        }
        self.actions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, action: &str) -> Option<&ActionDefinition> {
        self.actions.get(action)
    }

    pub fn sensitivity(&self, action: &str) -> Sensitivity {
        self.actions
            .get(action)
            .map(|d| d.sensitivity)
            .unwrap_or_else(|| Sensitivity::infer(action))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
