//! Governed change proposals.
//!
//! A proposal captures a requested mutation of a role or pricing profile as a
//! diff against the version it was computed from, and accumulates approvals
//! until it can be activated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diff::ChangeDiff;
use crate::ids::{ProfileId, ProposalId, RegionId, RoleId, ServiceKey, UserId};
use crate::pricing::ProfileDraft;
use crate::role::RoleDraft;

/// Kind of governed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Role,
    PricingProfile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::PricingProfile => "pricing_profile",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the entity a proposal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Role(RoleId),
    PricingProfile(ProfileId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Role(_) => EntityKind::Role,
            Self::PricingProfile(_) => EntityKind::PricingProfile,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(id) => write!(f, "{}", id),
            Self::PricingProfile(id) => write!(f, "{}", id),
        }
    }
}

/// Desired state submitted with a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum DesiredState {
    Role(RoleDraft),
    PricingProfile(ProfileDraft),
}

impl DesiredState {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Role(_) => EntityKind::Role,
            Self::PricingProfile(_) => EntityKind::PricingProfile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Active,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "active" => Some(Self::Active),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Active)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: UserId,
    pub approved_at: DateTime<Utc>,
}

/// A requested change to a governed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub id: ProposalId,
    pub entity: EntityRef,
    #[serde(default)]
    pub region_id: Option<RegionId>,
    #[serde(default)]
    pub service_key: Option<ServiceKey>,
    pub requested_by: UserId,
    #[serde(default)]
    pub justification: Option<String>,
    pub diff: ChangeDiff,
    /// Entity version the diff was computed against
    pub base_version: u64,
    pub status: ProposalStatus,
    pub needs_approvals: u32,
    /// Distinct approvers, in approval order
    pub approvals: Vec<Approval>,
    pub regulator_impact: bool,
    #[serde(default)]
    pub effective_at: Option<DateTime<Utc>>,
    /// Profile this change replaces; it is superseded on activation
    #[serde(default)]
    pub supersedes: Option<ProfileId>,
    /// Pending proposal cancelled in favour of this one
    #[serde(default)]
    pub superseded_proposal: Option<ProposalId>,
    pub emergency_blocked: bool,
    #[serde(default)]
    pub reviewed_by: Option<UserId>,
    #[serde(default)]
    pub review_reason: Option<String>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    /// Row version, bumped on every committed transition
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeProposal {
    pub fn new(
        entity: EntityRef,
        requested_by: UserId,
        diff: ChangeDiff,
        base_version: u64,
        needs_approvals: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProposalId::generate(),
            entity,
            region_id: None,
            service_key: None,
            requested_by,
            justification: None,
            diff,
            base_version,
            status: ProposalStatus::Pending,
            needs_approvals,
            approvals: Vec::new(),
            regulator_impact: false,
            effective_at: None,
            supersedes: None,
            superseded_proposal: None,
            emergency_blocked: false,
            reviewed_by: None,
            review_reason: None,
            activated_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_approved(&self, approver: &UserId) -> bool {
        self.approvals.iter().any(|a| &a.approver == approver)
    }

    pub fn threshold_met(&self) -> bool {
        self.approval_count() >= self.needs_approvals
    }

    /// Record an approval unless the approver already counted or the
    /// threshold is already met. Returns whether the approval was added.
    pub fn add_approval(&mut self, approver: UserId, now: DateTime<Utc>) -> bool {
        if self.has_approved(&approver) || self.threshold_met() {
            return false;
        }
        self.approvals.push(Approval {
            approver,
            approved_at: now,
        });
        true
    }

    /// Whether the change may take effect at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.effective_at.map_or(true, |at| at <= now)
    }

    pub fn summary(&self) -> ProposalSummary {
        ProposalSummary {
            id: self.id,
            status: self.status,
            needs_approvals: self.needs_approvals,
            approval_count: self.approval_count(),
            emergency_blocked: self.emergency_blocked,
        }
    }
}

/// Compact proposal view returned at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: ProposalId,
    pub status: ProposalStatus,
    pub needs_approvals: u32,
    pub approval_count: u32,
    pub emergency_blocked: bool,
}
