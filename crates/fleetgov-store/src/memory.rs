//! In-memory reference implementation of [`GovernanceStore`].
//!
//! Deterministic and test-friendly. All tables sit behind one lock so a
//! batch is checked and applied as a unit. Supports injected commit failures
//! for exercising rollback paths.

use async_trait::async_trait;
use fleetgov_types::{
    AuditLogEntry, AuditQuery, BrakeState, ChangeProposal, EntityRef, H3Index, HexStateKey,
    PricingProfile, ProfileId, ProposalId, ProposalStatus, RegionCell, RegionId, Role, RoleId,
    ScheduleId, ScheduleStatus, ServiceKey, SurgeHexState, SurgeSchedule,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::batch::{Precondition, Write, WriteBatch};
use crate::traits::GovernanceStore;
use crate::{StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    roles: HashMap<RoleId, Role>,
    profiles: HashMap<ProfileId, PricingProfile>,
    proposals: HashMap<ProposalId, ChangeProposal>,
    schedules: HashMap<ScheduleId, SurgeSchedule>,
    hex_states: BTreeMap<HexStateKey, SurgeHexState>,
    region_cells: BTreeMap<(RegionId, u8), BTreeSet<H3Index>>,
    brake: BrakeState,
    audit: Vec<AuditLogEntry>,
}

/// In-memory governance store.
#[derive(Default)]
pub struct InMemoryGovernanceStore {
    tables: RwLock<Tables>,
    failing_commits: AtomicUsize,
}

impl InMemoryGovernanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a backend error after their
    /// preconditions pass. Nothing from a failed commit is applied.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of audit entries recorded so far.
    pub fn audit_len(&self) -> usize {
        self.read().map(|t| t.audit.len()).unwrap_or(0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("governance tables lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("governance tables lock poisoned".to_string()))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Tables {
    fn check(&self, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::RoleVersion { id, version } => {
                self.roles.get(id).map(|r| r.version) == Some(*version)
            }
            Precondition::ProfileVersion { id, version } => {
                self.profiles.get(id).map(|p| p.version) == Some(*version)
            }
            Precondition::ProposalVersion { id, version } => {
                self.proposals.get(id).map(|p| p.version) == Some(*version)
            }
            Precondition::ScheduleVersion { id, version } => {
                self.schedules.get(id).map(|s| s.version) == Some(*version)
            }
            Precondition::NoPendingProposal { entity, except } => !self.proposals.values().any(|p| {
                p.entity == *entity && p.is_pending() && Some(p.id) != *except
            }),
            Precondition::RoleNameAvailable(name) => !self.roles.values().any(|r| &r.name == name),
            Precondition::BrakeReleased => !self.brake.active,
            Precondition::BrakeEngaged => self.brake.active,
        }
    }

    /// Reject writes that could not be applied, before anything is applied.
    fn validate(&self, writes: &[Write]) -> StoreResult<()> {
        let mut new_roles: HashSet<RoleId> = HashSet::new();
        let mut new_profiles: HashSet<ProfileId> = HashSet::new();

        for write in writes {
            match write {
                Write::InsertRole(role) => {
                    if self.roles.contains_key(&role.id) || !new_roles.insert(role.id) {
                        return Err(StoreError::Conflict(format!("{} already exists", role.id)));
                    }
                }
                Write::UpdateRole(role) => {
                    if !self.roles.contains_key(&role.id) && !new_roles.contains(&role.id) {
                        return Err(StoreError::NotFound(format!("{} not found", role.id)));
                    }
                    if self
                        .roles
                        .values()
                        .any(|r| r.id != role.id && r.name == role.name)
                    {
                        return Err(StoreError::Conflict(format!(
                            "role name {} already in use",
                            role.name
                        )));
                    }
                }
                Write::InsertProfile(profile) => {
                    if self.profiles.contains_key(&profile.id) || !new_profiles.insert(profile.id)
                    {
                        return Err(StoreError::Conflict(format!(
                            "{} already exists",
                            profile.id
                        )));
                    }
                }
                Write::UpdateProfileHeader(PricingProfile { id, .. })
                | Write::UpsertComponent { profile_id: id, .. }
                | Write::DeleteComponent { profile_id: id, .. }
                | Write::UpsertEarnings { profile_id: id, .. } => {
                    if !self.profiles.contains_key(id) && !new_profiles.contains(id) {
                        return Err(StoreError::NotFound(format!("{} not found", id)));
                    }
                }
                Write::PutProposal(_)
                | Write::PutSchedule(_)
                | Write::UpsertHexState(_)
                | Write::SetBrake(_)
                | Write::AppendAudit(_) => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::InsertRole(role) | Write::UpdateRole(role) => {
                self.roles.insert(role.id, role);
            }
            Write::InsertProfile(profile) => {
                self.profiles.insert(profile.id, profile);
            }
            Write::UpdateProfileHeader(header) => {
                if let Some(stored) = self.profiles.get_mut(&header.id) {
                    stored.name = header.name;
                    stored.status = header.status;
                    stored.currency = header.currency;
                    stored.base_fare_cents = header.base_fare_cents;
                    stored.per_km_cents = header.per_km_cents;
                    stored.per_minute_cents = header.per_minute_cents;
                    stored.minimum_fare_cents = header.minimum_fare_cents;
                    stored.surge_cap = header.surge_cap;
                    stored.version = header.version;
                    stored.updated_at = header.updated_at;
                }
            }
            Write::UpsertComponent {
                profile_id,
                key,
                component,
            } => {
                if let Some(stored) = self.profiles.get_mut(&profile_id) {
                    stored.components.insert(key, component);
                }
            }
            Write::DeleteComponent { profile_id, key } => {
                if let Some(stored) = self.profiles.get_mut(&profile_id) {
                    stored.components.remove(&key);
                }
            }
            Write::UpsertEarnings { profile_id, policy } => {
                if let Some(stored) = self.profiles.get_mut(&profile_id) {
                    stored.earnings_policy = policy;
                }
            }
            Write::PutProposal(proposal) => {
                self.proposals.insert(proposal.id, proposal);
            }
            Write::PutSchedule(schedule) => {
                self.schedules.insert(schedule.id, schedule);
            }
            Write::UpsertHexState(state) => {
                self.hex_states.insert(state.key.clone(), state);
            }
            Write::SetBrake(state) => {
                self.brake = state;
            }
            Write::AppendAudit(entry) => {
                self.audit.push(entry);
            }
        }
    }
}

#[async_trait]
impl GovernanceStore for InMemoryGovernanceStore {
    async fn get_role(&self, id: &RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.read()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<PricingProfile>> {
        Ok(self.read()?.profiles.get(id).cloned())
    }

    async fn list_profiles(&self, region: Option<&RegionId>) -> StoreResult<Vec<PricingProfile>> {
        let mut profiles: Vec<PricingProfile> = self
            .read()?
            .profiles
            .values()
            .filter(|p| region.map_or(true, |r| &p.region_id == r))
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(profiles)
    }

    async fn get_proposal(&self, id: &ProposalId) -> StoreResult<Option<ChangeProposal>> {
        Ok(self.read()?.proposals.get(id).cloned())
    }

    async fn find_pending_proposal(
        &self,
        entity: &EntityRef,
    ) -> StoreResult<Option<ChangeProposal>> {
        Ok(self
            .read()?
            .proposals
            .values()
            .find(|p| p.entity == *entity && p.is_pending())
            .cloned())
    }

    async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> StoreResult<Vec<ChangeProposal>> {
        let mut proposals: Vec<ChangeProposal> = self
            .read()?
            .proposals
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(proposals)
    }

    async fn get_schedule(&self, id: &ScheduleId) -> StoreResult<Option<SurgeSchedule>> {
        Ok(self.read()?.schedules.get(id).cloned())
    }

    async fn list_schedules(
        &self,
        status: Option<ScheduleStatus>,
    ) -> StoreResult<Vec<SurgeSchedule>> {
        let mut schedules: Vec<SurgeSchedule> = self
            .read()?
            .schedules
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        schedules.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        Ok(schedules)
    }

    async fn list_region_cells(
        &self,
        region: &RegionId,
        resolution: u8,
        limit: usize,
    ) -> StoreResult<Vec<RegionCell>> {
        let tables = self.read()?;
        let cells = tables
            .region_cells
            .get(&(region.clone(), resolution))
            .map(|set| {
                set.iter()
                    .take(limit)
                    .map(|h3| RegionCell {
                        region_id: region.clone(),
                        h3_index: h3.clone(),
                        resolution,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(cells)
    }

    async fn put_region_cells(&self, cells: Vec<RegionCell>) -> StoreResult<()> {
        let mut tables = self.write()?;
        for cell in cells {
            tables
                .region_cells
                .entry((cell.region_id, cell.resolution))
                .or_default()
                .insert(cell.h3_index);
        }
        Ok(())
    }

    async fn list_hex_states(
        &self,
        region: &RegionId,
        service: Option<&ServiceKey>,
    ) -> StoreResult<Vec<SurgeHexState>> {
        Ok(self
            .read()?
            .hex_states
            .values()
            .filter(|s| &s.key.region_id == region)
            .filter(|s| service.map_or(true, |k| &s.key.service_key == k))
            .cloned()
            .collect())
    }

    async fn get_brake(&self) -> StoreResult<BrakeState> {
        Ok(self.read()?.brake.clone())
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(query.select(&self.read()?.audit))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.write()?;

        if let Some(failed) = batch.preconditions.iter().find(|p| !tables.check(p)) {
            return Err(StoreError::PreconditionFailed(failed.clone()));
        }
        tables.validate(&batch.writes)?;

        if self.take_injected_failure() {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }

        for write in batch.writes {
            tables.apply(write);
        }
        Ok(())
    }
}
