//! Fleet governance data model.
//!
//! Shared types for the governance core: operator snapshots, roles, pricing
//! and surge profiles, surge schedules and per-cell state, change proposals
//! with their structured diffs, the emergency brake, and the audit log.

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod brake;
pub mod diff;
pub mod ids;
pub mod pricing;
pub mod proposal;
pub mod role;
pub mod surge;
pub mod user;
pub mod validation;

pub use audit::{AuditAction, AuditLogEntry, AuditQuery};
pub use brake::BrakeState;
pub use diff::{ChangeDiff, DiffBuilder, DiffError, DiffNode, FieldChange};
pub use ids::{
    AuditEntryId, H3Index, ProfileId, ProposalId, RegionId, RoleId, ScheduleId, ServiceKey,
    UserId,
};
pub use pricing::{
    ComponentKind, EarningsPolicy, PricingComponent, PricingProfile, ProfileDraft, ProfileStatus,
};
pub use proposal::{
    Approval, ChangeProposal, DesiredState, EntityKind, EntityRef, ProposalStatus,
    ProposalSummary,
};
pub use role::{RegionState, Role, RoleDraft, RoleScope};
pub use surge::{
    HexSource, HexStateKey, RegionCell, ScheduleDraft, ScheduleStatus, SurgeHexState,
    SurgeSchedule,
};
pub use user::User;
pub use validation::FieldError;
