//! Time-window surge schedules and per-cell surge state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{H3Index, ProfileId, RegionId, ScheduleId, ServiceKey, UserId};
use crate::validation::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Approved,
    Active,
    Expired,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

/// A planned surge for a region/service over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeSchedule {
    pub id: ScheduleId,
    pub region_id: RegionId,
    pub service_key: ServiceKey,
    pub multiplier: f64,
    pub additive_fee_cents: i64,
    /// Explicit cells; `None` means region-wide
    #[serde(default)]
    pub h3_indexes: Option<BTreeSet<H3Index>>,
    pub resolution: u8,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub created_by: UserId,
    #[serde(default)]
    pub approved_by: Option<UserId>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SurgeSchedule {
    pub fn from_draft(
        draft: ScheduleDraft,
        created_by: UserId,
        default_resolution: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduleId::generate(),
            region_id: draft.region_id,
            service_key: draft.service_key,
            multiplier: draft.multiplier,
            additive_fee_cents: draft.additive_fee_cents,
            h3_indexes: draft.h3_indexes,
            resolution: draft.resolution.unwrap_or(default_resolution),
            profile_id: draft.profile_id,
            starts_at: draft.starts_at,
            ends_at: draft.ends_at,
            status: ScheduleStatus::Pending,
            created_by,
            approved_by: None,
            activated_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_region_wide(&self) -> bool {
        self.h3_indexes.is_none()
    }

    /// Build the hex state row this schedule produces for one cell.
    pub fn hex_state_for(&self, h3_index: H3Index, now: DateTime<Utc>) -> SurgeHexState {
        SurgeHexState {
            key: HexStateKey {
                region_id: self.region_id.clone(),
                service_key: self.service_key.clone(),
                h3_index,
                resolution: self.resolution,
            },
            multiplier: self.multiplier,
            additive_fee_cents: self.additive_fee_cents,
            source: HexSource::Scheduled,
            valid_from: self.starts_at,
            valid_until: Some(self.ends_at),
            profile_id: self.profile_id,
            schedule_id: Some(self.id),
            updated_at: now,
        }
    }
}

/// Request to create a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub region_id: RegionId,
    pub service_key: ServiceKey,
    pub multiplier: f64,
    #[serde(default)]
    pub additive_fee_cents: i64,
    #[serde(default)]
    pub h3_indexes: Option<BTreeSet<H3Index>>,
    #[serde(default)]
    pub resolution: Option<u8>,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl ScheduleDraft {
    pub fn validate(&self, max_multiplier: f64) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if !(1.0..=max_multiplier).contains(&self.multiplier) {
            errors.push(FieldError::new(
                "multiplier",
                format!("must be between 1.0 and {}", max_multiplier),
            ));
        }
        if self.additive_fee_cents < 0 {
            errors.push(FieldError::new("additive_fee_cents", "must not be negative"));
        }
        if self.ends_at <= self.starts_at {
            errors.push(FieldError::new("ends_at", "must be after starts_at"));
        }
        if let Some(resolution) = self.resolution {
            if resolution > 15 {
                errors.push(FieldError::new("resolution", "must be between 0 and 15"));
            }
        }
        if let Some(cells) = &self.h3_indexes {
            if cells.is_empty() {
                errors.push(FieldError::new(
                    "h3_indexes",
                    "must not be empty; omit it for a region-wide schedule",
                ));
            }
        }

        errors
    }
}

/// Where a cell's surge value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HexSource {
    Ml,
    Manual,
    Scheduled,
    Shadow,
}

impl HexSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ml => "ml",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Shadow => "shadow",
        }
    }
}

/// Composite key of a surge hex state row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HexStateKey {
    pub region_id: RegionId,
    pub service_key: ServiceKey,
    pub h3_index: H3Index,
    pub resolution: u8,
}

/// Live surge state of one H3 cell for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeHexState {
    #[serde(flatten)]
    pub key: HexStateKey,
    pub multiplier: f64,
    pub additive_fee_cents: i64,
    pub source: HexSource,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    #[serde(default)]
    pub schedule_id: Option<ScheduleId>,
    pub updated_at: DateTime<Utc>,
}

/// A cell known to belong to a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionCell {
    pub region_id: RegionId,
    pub h3_index: H3Index,
    pub resolution: u8,
}

impl RegionCell {
    pub fn new(region_id: impl Into<RegionId>, h3_index: impl Into<H3Index>, resolution: u8) -> Self {
        Self {
            region_id: region_id.into(),
            h3_index: h3_index.into(),
            resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> ScheduleDraft {
        let start = Utc::now();
        ScheduleDraft {
            region_id: RegionId::new("nyc"),
            service_key: ServiceKey::new("economy"),
            multiplier: 1.5,
            additive_fee_cents: 100,
            h3_indexes: None,
            resolution: None,
            profile_id: None,
            starts_at: start,
            ends_at: start + Duration::hours(2),
        }
    }

    #[test]
    fn valid_draft_builds_pending_schedule() {
        let d = draft();
        assert!(d.validate(10.0).is_empty());
        let schedule = SurgeSchedule::from_draft(d, UserId::new("ops-1"), 8, Utc::now());
        assert_eq!(schedule.status, ScheduleStatus::Pending);
        assert_eq!(schedule.resolution, 8);
        assert!(schedule.is_region_wide());
    }

    #[test]
    fn validation_rejects_inverted_window_and_empty_cells() {
        let mut d = draft();
        d.ends_at = d.starts_at;
        d.multiplier = 0.8;
        d.h3_indexes = Some(BTreeSet::new());
        let fields: Vec<_> = d.validate(10.0).into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["multiplier", "ends_at", "h3_indexes"]);
    }

    #[test]
    fn hex_state_carries_schedule_window() {
        let schedule = SurgeSchedule::from_draft(draft(), UserId::new("ops-1"), 9, Utc::now());
        let row = schedule.hex_state_for(H3Index::new("8928308280fffff"), Utc::now());
        assert_eq!(row.source, HexSource::Scheduled);
        assert_eq!(row.key.resolution, 9);
        assert_eq!(row.valid_until, Some(schedule.ends_at));
        assert_eq!(row.schedule_id, Some(schedule.id));
    }
}
