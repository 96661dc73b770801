//! Surge schedule lifecycle up to approval.

use fleetgov_store::{GovernanceStore, Precondition, StoreError, Write, WriteBatch};
use fleetgov_types::{
    AuditAction, AuditLogEntry, ScheduleDraft, ScheduleId, ScheduleStatus, SurgeSchedule, UserId,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};

pub struct ScheduleBook {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
}

impl ScheduleBook {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Record a new schedule in `pending` status.
    pub async fn create(&self, draft: ScheduleDraft, actor: &UserId) -> Result<SurgeSchedule> {
        let errors = draft.validate(self.config.surge.max_multiplier);
        if !errors.is_empty() {
            return Err(GovernanceError::validation(errors));
        }

        let schedule = SurgeSchedule::from_draft(
            draft,
            actor.clone(),
            self.config.surge.default_resolution,
            self.clock.now(),
        );

        let mut batch = WriteBatch::new();
        batch
            .push(Write::PutSchedule(schedule.clone()))
            .audit(
                schedule_entry(&schedule, actor, AuditAction::ScheduleCreated)
                    .with_values(None, Some(json!(schedule))),
            );
        self.store.commit(batch).await?;

        info!(
            schedule_id = %schedule.id,
            region = %schedule.region_id,
            service = %schedule.service_key,
            multiplier = schedule.multiplier,
            region_wide = schedule.is_region_wide(),
            "Surge schedule created"
        );
        Ok(schedule)
    }

    /// Move a pending schedule to `approved`.
    pub async fn approve(&self, id: &ScheduleId, approver: &UserId) -> Result<SurgeSchedule> {
        let current = self.get(id).await?;
        if current.status != ScheduleStatus::Pending {
            return Err(GovernanceError::InvalidState(format!(
                "{id} is {}, only pending schedules can be approved",
                current.status.as_str()
            )));
        }

        let now = self.clock.now();
        let mut approved = current.clone();
        approved.status = ScheduleStatus::Approved;
        approved.approved_by = Some(approver.clone());
        approved.version += 1;
        approved.updated_at = now;

        let mut batch = WriteBatch::new();
        batch
            .require(Precondition::ScheduleVersion {
                id: *id,
                version: current.version,
            })
            .push(Write::PutSchedule(approved.clone()))
            .audit(
                schedule_entry(&approved, approver, AuditAction::ScheduleApproved).with_values(
                    Some(json!({ "status": current.status.as_str() })),
                    Some(json!({ "status": approved.status.as_str() })),
                ),
            );
        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(_) => {
                GovernanceError::InvalidState(format!("{id} changed concurrently"))
            }
            other => other.into(),
        })?;

        info!(schedule_id = %id, approver = %approver, "Surge schedule approved");
        Ok(approved)
    }

    pub async fn get(&self, id: &ScheduleId) -> Result<SurgeSchedule> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("{id} not found")))
    }

    pub async fn list(&self, status: Option<ScheduleStatus>) -> Result<Vec<SurgeSchedule>> {
        Ok(self.store.list_schedules(status).await?)
    }
}

impl std::fmt::Debug for ScheduleBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleBook").finish_non_exhaustive()
    }
}

pub(crate) fn schedule_entry(
    schedule: &SurgeSchedule,
    actor: &UserId,
    action: AuditAction,
) -> AuditLogEntry {
    AuditLogEntry::new(
        "surge_schedule",
        schedule.id,
        actor.clone(),
        action,
        schedule.updated_at,
    )
    .with_scope(
        Some(schedule.region_id.clone()),
        Some(schedule.service_key.clone()),
    )
}
