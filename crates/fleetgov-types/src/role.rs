//! Role definitions.
//!
//! A role bundles a privilege level and a permission set. Roles are created
//! directly but every later change goes through a change proposal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::diff::{ChangeDiff, DiffError};
use crate::ids::RoleId;
use crate::validation::FieldError;

/// Lifecycle state of an operating region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    Prospect,
    Pilot,
    Active,
    Paused,
}

impl RegionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Pilot => "pilot",
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    /// States an expansion manager may operate in.
    pub fn is_expansion_stage(&self) -> bool {
        matches!(self, Self::Prospect | Self::Pilot)
    }
}

/// Optional domain and PII scope attached to a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleScope {
    /// Business domain the role is confined to (e.g. `pricing`, `support`)
    #[serde(default)]
    pub domain: Option<String>,

    /// Whether holders may request PII access at all
    #[serde(default)]
    pub pii_access: bool,
}

/// A role definition as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub level: u32,
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub scope: Option<RoleScope>,
    /// Region states this role may act in; only consulted for `expansion_manager`
    #[serde(default)]
    pub allowed_region_states: Option<BTreeSet<RegionState>>,
    pub is_system: bool,
    /// Row version, bumped on every committed change
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub const EXPANSION_MANAGER: &'static str = "expansion_manager";

    /// Build a new role from a draft.
    pub fn from_draft(draft: RoleDraft, is_system: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: RoleId::generate(),
            name: draft.name,
            description: draft.description,
            level: draft.level,
            permissions: draft.permissions,
            scope: draft.scope,
            allowed_region_states: draft.allowed_region_states,
            is_system,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The governed part of this role, as a draft.
    pub fn to_draft(&self) -> RoleDraft {
        RoleDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            level: self.level,
            permissions: self.permissions.clone(),
            scope: self.scope.clone(),
            allowed_region_states: self.allowed_region_states.clone(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Compute the diff from this role to a desired state.
    pub fn diff_to(&self, desired: &RoleDraft) -> Result<ChangeDiff, DiffError> {
        ChangeDiff::builder()
            .field("name", &self.name, &desired.name)
            .field("description", &self.description, &desired.description)
            .field("level", &self.level, &desired.level)
            .field("permissions", &self.permissions, &desired.permissions)
            .field("scope", &self.scope, &desired.scope)
            .field(
                "allowed_region_states",
                &self.allowed_region_states,
                &desired.allowed_region_states,
            )
            .build()
    }
}

/// Desired state of a role, as submitted by a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub level: u32,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub scope: Option<RoleScope>,
    #[serde(default)]
    pub allowed_region_states: Option<BTreeSet<RegionState>>,
}

impl RoleDraft {
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            level,
            permissions: BTreeSet::new(),
            scope: None,
            allowed_region_states: None,
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_scope(mut self, scope: RoleScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_region_states<I>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = RegionState>,
    {
        self.allowed_region_states = Some(states.into_iter().collect());
        self
    }

    /// Check the draft against the allowed level range.
    pub fn validate(&self, min_level: u32, max_level: u32) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        } else if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            errors.push(FieldError::new(
                "name",
                "may only contain lowercase letters, digits and underscores",
            ));
        }

        if self.level < min_level || self.level > max_level {
            errors.push(FieldError::new(
                "level",
                format!("must be between {} and {}", min_level, max_level),
            ));
        }

        if self.permissions.iter().any(|p| p.trim().is_empty()) {
            errors.push(FieldError::new("permissions", "must not contain empty entries"));
        }

        if self.allowed_region_states.is_some() && self.name != Role::EXPANSION_MANAGER {
            errors.push(FieldError::new(
                "allowed_region_states",
                "only applies to the expansion_manager role",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_round_trips_through_role() {
        let draft = RoleDraft::new("dispatcher", 20)
            .with_permissions(["bookings:read", "bookings:assign"])
            .with_description("Dispatch desk");
        let role = Role::from_draft(draft.clone(), false, Utc::now());
        assert_eq!(role.to_draft(), draft);
        assert_eq!(role.version, 1);
        assert!(role.has_permission("bookings:assign"));
    }

    #[test]
    fn validation_reports_each_field() {
        let draft = RoleDraft::new("", 500).with_permission(" ");
        let errors = draft.validate(0, 100);
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "level", "permissions"]);
    }

    #[test]
    fn region_states_only_for_expansion_manager() {
        let draft = RoleDraft::new("dispatcher", 10).with_region_states([RegionState::Pilot]);
        assert_eq!(draft.validate(0, 100)[0].field, "allowed_region_states");

        let draft = RoleDraft::new(Role::EXPANSION_MANAGER, 10)
            .with_region_states([RegionState::Prospect, RegionState::Pilot]);
        assert!(draft.validate(0, 100).is_empty());
    }

    #[test]
    fn diff_only_lists_changed_fields() {
        let role = Role::from_draft(
            RoleDraft::new("dispatcher", 20).with_permission("bookings:read"),
            false,
            Utc::now(),
        );
        let desired = role.to_draft().with_permission("bookings:assign");
        let diff = role.diff_to(&desired).unwrap();
        assert_eq!(diff.changed_fields(), vec!["permissions"]);

        let applied = diff.apply(&role).unwrap();
        assert!(applied.has_permission("bookings:assign"));
        assert_eq!(applied.id, role.id);
    }

    #[test]
    fn expansion_stages() {
        assert!(RegionState::Prospect.is_expansion_stage());
        assert!(RegionState::Pilot.is_expansion_stage());
        assert!(!RegionState::Active.is_expansion_stage());
    }
}
