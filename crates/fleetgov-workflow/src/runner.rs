//! Externally triggered activation sweeps.
//!
//! Nothing here loops on its own. A cron-like scheduler calls
//! [`ScheduledActivationRunner::promote`] for one schedule, or one of the
//! sweeps for everything that is due. Every call is safe to repeat and to
//! run concurrently with itself: per-schedule locks serialize promotions in
//! process, version preconditions serialize them across processes, and hex
//! state rows are upserted by key. Promotion is held back while the
//! emergency brake is engaged; expiry is not.

use chrono::{DateTime, Utc};
use fleetgov_store::{GovernanceStore, Precondition, StoreError, Write, WriteBatch};
use fleetgov_types::{
    AuditAction, H3Index, ProposalId, ProposalStatus, ScheduleId, ScheduleStatus, SurgeSchedule,
    UserId,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::locks::KeyedLocks;
use crate::proposals::ProposalWorkflow;
use crate::schedules::schedule_entry;

/// Response of a successful promotion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub message: String,
    pub schedule_id: ScheduleId,
    pub activated_at: DateTime<Utc>,
    pub cells_updated: usize,
}

/// Item that failed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of a sweep over everything due.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<SweepFailure>,
}

impl<T> Default for SweepReport<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> SweepReport<T> {
    fn fail(&mut self, id: impl ToString, err: &GovernanceError) {
        self.failed.push(SweepFailure {
            id: id.to_string(),
            error: err.to_string(),
        });
    }
}

pub struct ScheduledActivationRunner {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
    proposals: Arc<ProposalWorkflow>,
    locks: KeyedLocks<ScheduleId>,
}

impl ScheduledActivationRunner {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
        proposals: Arc<ProposalWorkflow>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            proposals,
            locks: KeyedLocks::new(),
        }
    }

    /// Promote an approved schedule whose start time has passed.
    ///
    /// Writes one `scheduled` hex state per target cell, marks the schedule
    /// active and records the activation, all in one transaction. A second
    /// call on the same schedule fails with `InvalidState` and writes
    /// nothing.
    pub async fn promote(&self, id: &ScheduleId, actor: &UserId) -> Result<ActivationResult> {
        let _guard = self.locks.lock(*id).await;

        let schedule = self
            .store
            .get_schedule(id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))?;
        if schedule.status != ScheduleStatus::Approved {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only approved schedules can be promoted",
                schedule.status.as_str()
            )));
        }

        let now = self.clock.now();
        if now < schedule.starts_at {
            return Err(GovernanceError::TooEarly(format!(
                "{id} starts at {}",
                schedule.starts_at.to_rfc3339()
            )));
        }

        let cells = self.target_cells(&schedule).await?;

        let mut active = schedule.clone();
        active.status = ScheduleStatus::Active;
        active.activated_at = Some(now);
        active.version += 1;
        active.updated_at = now;

        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::ScheduleVersion {
                id: *id,
                version: schedule.version,
            })
            .require(Precondition::BrakeReleased);
        for cell in &cells {
            batch.push(Write::UpsertHexState(schedule.hex_state_for(cell.clone(), now)));
        }
        batch.push(Write::PutSchedule(active.clone())).audit(
            schedule_entry(&active, actor, AuditAction::ScheduleActivated).with_values(
                Some(json!({ "status": schedule.status.as_str() })),
                Some(json!({
                    "status": active.status.as_str(),
                    "multiplier": active.multiplier,
                    "additiveFeeCents": active.additive_fee_cents,
                    "cells": cells.len(),
                })),
            ),
        );

        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(Precondition::BrakeReleased) => {
                GovernanceError::EmergencyBrake(format!("{id} held back while engaged"))
            }
            StoreError::PreconditionFailed(_) => {
                GovernanceError::InvalidState(format!("{id} changed concurrently"))
            }
            other => {
                warn!(schedule_id = %id, error = %other, "Schedule promotion rolled back");
                GovernanceError::ActivationFailed(other.to_string())
            }
        })?;

        info!(
            schedule_id = %id,
            region = %schedule.region_id,
            service = %schedule.service_key,
            cells = cells.len(),
            "Surge schedule activated"
        );

        Ok(ActivationResult {
            message: format!("Schedule activated, {} cells updated", cells.len()),
            schedule_id: *id,
            activated_at: now,
            cells_updated: cells.len(),
        })
    }

    /// Promote every approved schedule whose start time has passed.
    pub async fn promote_due(&self, actor: &UserId) -> Result<SweepReport<ActivationResult>> {
        let now = self.clock.now();
        let due: Vec<ScheduleId> = self
            .store
            .list_schedules(Some(ScheduleStatus::Approved))
            .await?
            .into_iter()
            .filter(|s| s.starts_at <= now)
            .map(|s| s.id)
            .collect();

        let mut report = SweepReport::default();
        for id in due {
            match self.promote(&id, actor).await {
                Ok(result) => report.succeeded.push(result),
                // Promoted by a concurrent trigger in the meantime.
                Err(GovernanceError::InvalidState(reason)) => {
                    debug!(schedule_id = %id, reason = %reason, "Schedule skipped")
                }
                // Stays approved; the next sweep after release promotes it.
                Err(GovernanceError::EmergencyBrake(reason)) => {
                    info!(schedule_id = %id, reason = %reason, "Schedule held by emergency brake")
                }
                Err(err) => {
                    warn!(schedule_id = %id, error = %err, "Schedule promotion failed");
                    report.fail(id, &err);
                }
            }
        }
        Ok(report)
    }

    /// Move active schedules whose window has ended to `expired`.
    pub async fn expire_due(&self, actor: &UserId) -> Result<SweepReport<ScheduleId>> {
        let now = self.clock.now();
        let ended: Vec<ScheduleId> = self
            .store
            .list_schedules(Some(ScheduleStatus::Active))
            .await?
            .into_iter()
            .filter(|s| s.ends_at <= now)
            .map(|s| s.id)
            .collect();

        let mut report = SweepReport::default();
        for id in ended {
            match self.expire(&id, actor, now).await {
                Ok(true) => report.succeeded.push(id),
                Ok(false) => {}
                Err(err) => {
                    warn!(schedule_id = %id, error = %err, "Schedule expiry failed");
                    report.fail(id, &err);
                }
            }
        }
        Ok(report)
    }

    /// Activate approved proposals whose effective time has come.
    pub async fn activate_due_proposals(&self, actor: &UserId) -> Result<SweepReport<ProposalId>> {
        let now = self.clock.now();
        let due: Vec<ProposalId> = self
            .store
            .list_proposals(Some(ProposalStatus::Approved))
            .await?
            .into_iter()
            .filter(|p| p.is_due(now))
            .map(|p| p.id)
            .collect();

        let mut report = SweepReport::default();
        for id in due {
            match self.proposals.activate_approved(&id, actor).await {
                Ok(proposal) if proposal.status == ProposalStatus::Active => {
                    report.succeeded.push(id)
                }
                Ok(_) => debug!(proposal_id = %id, "Proposal still blocked"),
                Err(err) => {
                    warn!(proposal_id = %id, error = %err, "Deferred activation failed");
                    report.fail(id, &err);
                }
            }
        }
        Ok(report)
    }

    async fn expire(&self, id: &ScheduleId, actor: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.locks.lock(*id).await;

        let Some(schedule) = self.store.get_schedule(id).await? else {
            return Ok(false);
        };
        if schedule.status != ScheduleStatus::Active {
            return Ok(false);
        }

        let mut expired = schedule.clone();
        expired.status = ScheduleStatus::Expired;
        expired.version += 1;
        expired.updated_at = now;

        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::ScheduleVersion {
                id: *id,
                version: schedule.version,
            })
            .push(Write::PutSchedule(expired.clone()))
            .audit(
                schedule_entry(&expired, actor, AuditAction::ScheduleExpired).with_values(
                    Some(json!({ "status": schedule.status.as_str() })),
                    Some(json!({ "status": expired.status.as_str() })),
                ),
            );

        match self.store.commit(batch).await {
            Ok(()) => {
                info!(schedule_id = %id, "Surge schedule expired");
                Ok(true)
            }
            Err(StoreError::PreconditionFailed(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Cells a schedule applies to.
    ///
    /// Region-wide schedules cover the known cells of the region at the
    /// schedule's resolution, up to the configured limit. Excluded services
    /// get no region-wide cells at all.
    async fn target_cells(&self, schedule: &SurgeSchedule) -> Result<Vec<H3Index>> {
        if let Some(cells) = &schedule.h3_indexes {
            return Ok(cells.iter().cloned().collect());
        }

        if self.config.surge.excludes_region_wide(&schedule.service_key) {
            info!(
                schedule_id = %schedule.id,
                service = %schedule.service_key,
                "Service excluded from region-wide surge, no cells written"
            );
            return Ok(Vec::new());
        }

        let limit = self.config.surge.region_wide_hex_limit;
        let cells = self
            .store
            .list_region_cells(&schedule.region_id, schedule.resolution, limit)
            .await?;
        if cells.len() >= limit {
            warn!(
                schedule_id = %schedule.id,
                region = %schedule.region_id,
                limit,
                "Region-wide surge capped at the cell limit"
            );
        }
        Ok(cells.into_iter().map(|cell| cell.h3_index).collect())
    }
}

impl std::fmt::Debug for ScheduledActivationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledActivationRunner")
            .field("surge", &self.config.surge)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_result_uses_camel_case() {
        let result = ActivationResult {
            message: "Schedule activated, 0 cells updated".into(),
            schedule_id: ScheduleId::generate(),
            activated_at: Utc::now(),
            cells_updated: 0,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("scheduleId").is_some());
        assert!(value.get("activatedAt").is_some());
        assert_eq!(value["cellsUpdated"], 0);
    }

    #[test]
    fn sweep_failures_keep_ids() {
        let mut report: SweepReport<ScheduleId> = SweepReport::default();
        let id = ScheduleId::generate();
        report.fail(id, &GovernanceError::ActivationFailed("down".into()));
        assert_eq!(report.failed[0].id, id.to_string());
        assert!(report.succeeded.is_empty());
    }
}
