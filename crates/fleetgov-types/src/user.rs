//! Authenticated operator snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{RegionId, UserId};
use crate::role::Role;

/// An operator as seen by the governance core for the duration of one request.
///
/// Built by the identity provider from role and region assignments. The
/// permission set is flattened and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    pub role: String,
    pub level: u32,
    pub permissions: BTreeSet<String>,
    pub allowed_regions: BTreeSet<RegionId>,
}

impl User {
    pub fn new(user_id: impl Into<UserId>, role: impl Into<String>, level: u32) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            level,
            permissions: BTreeSet::new(),
            allowed_regions: BTreeSet::new(),
        }
    }

    /// Derive the request snapshot from a role and the user's region assignments.
    pub fn from_role<I>(user_id: impl Into<UserId>, role: &Role, regions: I) -> Self
    where
        I: IntoIterator<Item = RegionId>,
    {
        Self {
            user_id: user_id.into(),
            role: role.name.clone(),
            level: role.level,
            permissions: role.permissions.clone(),
            allowed_regions: regions.into_iter().collect(),
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

    pub fn with_region(mut self, region: impl Into<RegionId>) -> Self {
        self.allowed_regions.insert(region.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn can_access_region(&self, region: &RegionId) -> bool {
        self.allowed_regions.contains(region)
    }

    pub fn is_expansion_manager(&self) -> bool {
        self.role == Role::EXPANSION_MANAGER
    }
}
