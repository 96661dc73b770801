//! Governed-change workflow for the fleet governance core.
//!
//! Roles and pricing profiles change only through proposals: a proposal
//! records a diff against the live entity, collects approvals until its
//! threshold is met, and is then applied by the [`ActivationExecutor`] in a
//! single transaction together with its audit entry. The [`EmergencyBrake`],
//! shared through the store by every process, holds every activation back
//! while it is engaged.
//!
//! Surge schedules follow their own lifecycle (pending, approved, active,
//! expired). The [`ScheduledActivationRunner`] promotes them when an external
//! trigger asks it to, expanding each schedule into per-cell hex state.
//!
//! [`GovernanceService`] ties the parts together and authorizes every user
//! operation through the policy engine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetgov_policy::actions;
//! use fleetgov_store::InMemoryGovernanceStore;
//! use fleetgov_types::{RoleDraft, User};
//! use fleetgov_workflow::GovernanceService;
//!
//! # async fn run() -> fleetgov_workflow::Result<()> {
//! let service = GovernanceService::builder(Arc::new(InMemoryGovernanceStore::new())).build();
//! let admin = User::new("admin-1", "admin", 90).with_permission(actions::ROLES_CREATE);
//! let role = service.create_role(&admin, RoleDraft::new("dispatcher", 20)).await?;
//! println!("created {}", role.id);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod brake;
pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod executor;
mod locks;
pub mod proposals;
pub mod runner;
pub mod schedules;
pub mod service;

pub use audit::AuditTrail;
pub use brake::EmergencyBrake;
pub use fleetgov_types::BrakeState;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ApprovalConfig, GovernanceConfig, RoleConfig, SurgeConfig};
pub use entities::EntityRegistry;
pub use error::{GovernanceError, Result};
pub use executor::{ActivationExecutor, AppliedChange, AppliedEntity};
pub use proposals::{
    BulkItemError, BulkOutcome, BulkResult, BulkRoleItem, ProposalOptions, ProposalWorkflow,
};
pub use runner::{ActivationResult, ScheduledActivationRunner, SweepFailure, SweepReport};
pub use schedules::ScheduleBook;
pub use service::{GovernanceService, GovernanceServiceBuilder};
