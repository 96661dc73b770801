//! Evaluation context passed through the stages.

use fleetgov_types::{RegionId, RegionState, User};
use serde::{Deserialize, Serialize};

use crate::action::Sensitivity;

/// Attributes of the resource an action targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContext {
    #[serde(default)]
    pub region_id: Option<RegionId>,
    #[serde(default)]
    pub region_state: Option<RegionState>,
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(region_id: impl Into<RegionId>) -> Self {
        Self {
            region_id: Some(region_id.into()),
            region_state: None,
        }
    }

    pub fn with_region_state(mut self, state: RegionState) -> Self {
        self.region_state = Some(state);
        self
    }
}

/// One authorization request as seen by a stage.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub user: &'a User,
    pub action: &'a str,
    pub resource: Option<&'a ResourceContext>,
    pub sensitivity: Sensitivity,
}

impl<'a> AuthorizationRequest<'a> {
    pub fn region_id(&self) -> Option<&'a RegionId> {
        self.resource.and_then(|r| r.region_id.as_ref())
    }

    pub fn region_state(&self) -> Option<RegionState> {
        self.resource.and_then(|r| r.region_state)
    }
}
