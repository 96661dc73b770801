use async_trait::async_trait;
use fleetgov_types::{
    AuditLogEntry, AuditQuery, BrakeState, ChangeProposal, EntityRef, PricingProfile, ProfileId,
    ProposalId, ProposalStatus, RegionCell, RegionId, Role, RoleId, ScheduleId, ScheduleStatus,
    ServiceKey, SurgeHexState, SurgeSchedule,
};

use crate::batch::WriteBatch;
use crate::StoreResult;

/// Storage interface for the governance core.
///
/// Reads are point lookups and simple listings. Every mutation goes through
/// [`commit`](GovernanceStore::commit), which applies a batch atomically.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    async fn get_role(&self, id: &RoleId) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Roles ordered by level, highest first.
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    /// Profile with its components and earnings policy.
    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<PricingProfile>>;

    async fn list_profiles(&self, region: Option<&RegionId>) -> StoreResult<Vec<PricingProfile>>;

    async fn get_proposal(&self, id: &ProposalId) -> StoreResult<Option<ChangeProposal>>;

    /// The pending proposal targeting an entity, if any.
    async fn find_pending_proposal(&self, entity: &EntityRef)
        -> StoreResult<Option<ChangeProposal>>;

    /// Proposals newest first, optionally by status.
    async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> StoreResult<Vec<ChangeProposal>>;

    async fn get_schedule(&self, id: &ScheduleId) -> StoreResult<Option<SurgeSchedule>>;

    /// Schedules ordered by start time, optionally by status.
    async fn list_schedules(
        &self,
        status: Option<ScheduleStatus>,
    ) -> StoreResult<Vec<SurgeSchedule>>;

    /// Known cells of a region at a resolution, in index order, at most `limit`.
    async fn list_region_cells(
        &self,
        region: &RegionId,
        resolution: u8,
        limit: usize,
    ) -> StoreResult<Vec<RegionCell>>;

    /// Register cells as belonging to their region.
    async fn put_region_cells(&self, cells: Vec<RegionCell>) -> StoreResult<()>;

    async fn list_hex_states(
        &self,
        region: &RegionId,
        service: Option<&ServiceKey>,
    ) -> StoreResult<Vec<SurgeHexState>>;

    /// The shared emergency brake row. A store that never saw a brake
    /// write reports it released.
    async fn get_brake(&self) -> StoreResult<BrakeState>;

    /// Audit entries matching the query, newest first.
    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>>;

    /// Check every precondition and apply every write in one transaction.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}
