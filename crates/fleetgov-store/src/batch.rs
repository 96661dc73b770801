//! Transactional write batches.
//!
//! A batch is a list of preconditions followed by a list of writes. A
//! backend checks every precondition and applies every write in a single
//! transaction: either all writes become visible or none do.

use fleetgov_types::{
    AuditLogEntry, BrakeState, ChangeProposal, EarningsPolicy, EntityRef, PricingComponent,
    PricingProfile, ProfileId, ProposalId, Role, RoleId, ScheduleId, SurgeHexState,
    SurgeSchedule,
};
use std::fmt;

/// Condition that must hold when the batch is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The role row is at exactly this version
    RoleVersion { id: RoleId, version: u64 },
    /// The profile row is at exactly this version
    ProfileVersion { id: ProfileId, version: u64 },
    /// The proposal row is at exactly this version
    ProposalVersion { id: ProposalId, version: u64 },
    /// The schedule row is at exactly this version
    ScheduleVersion { id: ScheduleId, version: u64 },
    /// No pending proposal targets the entity, ignoring `except`
    NoPendingProposal {
        entity: EntityRef,
        except: Option<ProposalId>,
    },
    /// No role uses this name
    RoleNameAvailable(String),
    /// The emergency brake is released; read under a shared lock
    BrakeReleased,
    /// The emergency brake is engaged; read under a shared lock
    BrakeEngaged,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoleVersion { id, version } => write!(f, "{} at version {}", id, version),
            Self::ProfileVersion { id, version } => write!(f, "{} at version {}", id, version),
            Self::ProposalVersion { id, version } => write!(f, "{} at version {}", id, version),
            Self::ScheduleVersion { id, version } => write!(f, "{} at version {}", id, version),
            Self::NoPendingProposal { entity, .. } => {
                write!(f, "no pending proposal for {}", entity)
            }
            Self::RoleNameAvailable(name) => write!(f, "role name {} is available", name),
            Self::BrakeReleased => write!(f, "emergency brake is released"),
            Self::BrakeEngaged => write!(f, "emergency brake is engaged"),
        }
    }
}

/// A single row-level write.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    InsertRole(Role),
    UpdateRole(Role),
    /// Profile header, every component and the earnings policy
    InsertProfile(PricingProfile),
    /// Profile header columns only
    UpdateProfileHeader(PricingProfile),
    UpsertComponent {
        profile_id: ProfileId,
        key: String,
        component: PricingComponent,
    },
    DeleteComponent {
        profile_id: ProfileId,
        key: String,
    },
    UpsertEarnings {
        profile_id: ProfileId,
        policy: EarningsPolicy,
    },
    PutProposal(ChangeProposal),
    PutSchedule(SurgeSchedule),
    /// Insert or overwrite by composite key
    UpsertHexState(SurgeHexState),
    /// Replace the brake row
    SetBrake(BrakeState),
    AppendAudit(AuditLogEntry),
}

impl Write {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertRole(_) => "insert_role",
            Self::UpdateRole(_) => "update_role",
            Self::InsertProfile(_) => "insert_profile",
            Self::UpdateProfileHeader(_) => "update_profile_header",
            Self::UpsertComponent { .. } => "upsert_component",
            Self::DeleteComponent { .. } => "delete_component",
            Self::UpsertEarnings { .. } => "upsert_earnings",
            Self::PutProposal(_) => "put_proposal",
            Self::PutSchedule(_) => "put_schedule",
            Self::UpsertHexState(_) => "upsert_hex_state",
            Self::SetBrake(_) => "set_brake",
            Self::AppendAudit(_) => "append_audit",
        }
    }
}

/// Preconditions and writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, precondition: Precondition) -> &mut Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn audit(&mut self, entry: AuditLogEntry) -> &mut Self {
        self.writes.push(Write::AppendAudit(entry));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Number of hex state upserts in the batch.
    pub fn hex_upserts(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| matches!(w, Write::UpsertHexState(_)))
            .count()
    }
}
