//! Typed row adapters.
//!
//! Each table row is read into an explicit row struct and converted into the
//! domain type here, so nothing above this module handles untyped rows.

use chrono::{DateTime, Utc};
use fleetgov_types::{
    AuditAction, AuditEntryId, AuditLogEntry, BrakeState, ChangeProposal, EarningsPolicy,
    H3Index, HexStateKey, PricingComponent, PricingProfile, ProfileId, RegionId, Role, RoleId,
    ScheduleId, ServiceKey, SurgeHexState, SurgeSchedule, UserId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{StoreError, StoreResult};

pub(crate) fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("column {column}: {e}")))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Text form of a unit enum, using its serde name.
pub(crate) fn enum_to_text<T: Serialize>(value: &T) -> StoreResult<String> {
    match to_json(value)? {
        Value::String(s) => Ok(s),
        other => Err(StoreError::Serialization(format!(
            "expected a string enum, got {other}"
        ))),
    }
}

pub(crate) fn text_to_enum<T: DeserializeOwned>(raw: String) -> StoreResult<T> {
    from_json(Value::String(raw))
}

pub(crate) fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput(format!("{value} exceeds BIGINT")))
}

fn to_u64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("negative {column}")))
}

pub(crate) struct RoleRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub level: i32,
    pub permissions: Value,
    pub scope: Option<Value>,
    pub allowed_region_states: Option<Value>,
    pub is_system: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            id: get(row, "id")?,
            name: get(row, "name")?,
            description: get(row, "description")?,
            level: get(row, "level")?,
            permissions: get(row, "permissions")?,
            scope: get(row, "scope")?,
            allowed_region_states: get(row, "allowed_region_states")?,
            is_system: get(row, "is_system")?,
            version: get(row, "version")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    pub fn from_role(role: &Role) -> StoreResult<Self> {
        Ok(Self {
            id: *role.id.as_uuid(),
            name: role.name.clone(),
            description: role.description.clone(),
            level: i32::try_from(role.level)
                .map_err(|_| StoreError::InvalidInput("role level exceeds INTEGER".into()))?,
            permissions: to_json(&role.permissions)?,
            scope: role.scope.as_ref().map(to_json).transpose()?,
            allowed_region_states: role.allowed_region_states.as_ref().map(to_json).transpose()?,
            is_system: role.is_system,
            version: to_i64(role.version)?,
            created_at: role.created_at,
            updated_at: role.updated_at,
        })
    }

    pub fn into_role(self) -> StoreResult<Role> {
        Ok(Role {
            id: RoleId::from_uuid(self.id),
            name: self.name,
            description: self.description,
            level: u32::try_from(self.level)
                .map_err(|_| StoreError::Serialization("negative role level".into()))?,
            permissions: from_json(self.permissions)?,
            scope: self.scope.map(from_json).transpose()?,
            allowed_region_states: self.allowed_region_states.map(from_json).transpose()?,
            is_system: self.is_system,
            version: to_u64(self.version, "version")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Profile header columns; components and earnings live in their own tables.
pub(crate) struct ProfileRow {
    pub id: Uuid,
    pub region_id: String,
    pub service_key: String,
    pub name: String,
    pub status: String,
    pub currency: String,
    pub base_fare_cents: i64,
    pub per_km_cents: i64,
    pub per_minute_cents: i64,
    pub minimum_fare_cents: i64,
    pub surge_cap: f64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            id: get(row, "id")?,
            region_id: get(row, "region_id")?,
            service_key: get(row, "service_key")?,
            name: get(row, "name")?,
            status: get(row, "status")?,
            currency: get(row, "currency")?,
            base_fare_cents: get(row, "base_fare_cents")?,
            per_km_cents: get(row, "per_km_cents")?,
            per_minute_cents: get(row, "per_minute_cents")?,
            minimum_fare_cents: get(row, "minimum_fare_cents")?,
            surge_cap: get(row, "surge_cap")?,
            version: get(row, "version")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    pub fn from_profile(profile: &PricingProfile) -> StoreResult<Self> {
        Ok(Self {
            id: *profile.id.as_uuid(),
            region_id: profile.region_id.to_string(),
            service_key: profile.service_key.to_string(),
            name: profile.name.clone(),
            status: profile.status.as_str().to_string(),
            currency: profile.currency.clone(),
            base_fare_cents: profile.base_fare_cents,
            per_km_cents: profile.per_km_cents,
            per_minute_cents: profile.per_minute_cents,
            minimum_fare_cents: profile.minimum_fare_cents,
            surge_cap: profile.surge_cap,
            version: to_i64(profile.version)?,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        })
    }

    pub fn into_profile(
        self,
        components: BTreeMap<String, PricingComponent>,
        earnings_policy: EarningsPolicy,
    ) -> StoreResult<PricingProfile> {
        Ok(PricingProfile {
            id: ProfileId::from_uuid(self.id),
            region_id: RegionId::new(self.region_id),
            service_key: ServiceKey::new(self.service_key),
            name: self.name,
            status: text_to_enum(self.status)?,
            currency: self.currency,
            base_fare_cents: self.base_fare_cents,
            per_km_cents: self.per_km_cents,
            per_minute_cents: self.per_minute_cents,
            minimum_fare_cents: self.minimum_fare_cents,
            surge_cap: self.surge_cap,
            components,
            earnings_policy,
            version: to_u64(self.version, "version")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) struct ComponentRow {
    pub component_key: String,
    pub label: String,
    pub kind: String,
    pub amount: i64,
    pub enabled: bool,
}

impl ComponentRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            component_key: get(row, "component_key")?,
            label: get(row, "label")?,
            kind: get(row, "kind")?,
            amount: get(row, "amount")?,
            enabled: get(row, "enabled")?,
        })
    }

    pub fn from_component(key: &str, component: &PricingComponent) -> StoreResult<Self> {
        Ok(Self {
            component_key: key.to_string(),
            label: component.label.clone(),
            kind: enum_to_text(&component.kind)?,
            amount: component.amount,
            enabled: component.enabled,
        })
    }

    pub fn into_entry(self) -> StoreResult<(String, PricingComponent)> {
        Ok((
            self.component_key,
            PricingComponent {
                label: self.label,
                kind: text_to_enum(self.kind)?,
                amount: self.amount,
                enabled: self.enabled,
            },
        ))
    }
}

pub(crate) struct EarningsRow {
    pub driver_share_pct: f64,
    pub platform_fee_pct: f64,
    pub min_payout_cents: i64,
    pub incentive_pool_pct: Option<f64>,
}

impl EarningsRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            driver_share_pct: get(row, "driver_share_pct")?,
            platform_fee_pct: get(row, "platform_fee_pct")?,
            min_payout_cents: get(row, "min_payout_cents")?,
            incentive_pool_pct: get(row, "incentive_pool_pct")?,
        })
    }

    pub fn into_policy(self) -> EarningsPolicy {
        EarningsPolicy {
            driver_share_pct: self.driver_share_pct,
            platform_fee_pct: self.platform_fee_pct,
            min_payout_cents: self.min_payout_cents,
            incentive_pool_pct: self.incentive_pool_pct,
        }
    }
}

/// Proposals keep their full document in a JSONB column beside the indexed
/// lookup columns.
pub(crate) struct ProposalRow {
    pub data: Value,
}

impl ProposalRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            data: get(row, "data")?,
        })
    }

    pub fn into_proposal(self) -> StoreResult<ChangeProposal> {
        from_json(self.data)
    }
}

pub(crate) struct ScheduleRow {
    pub data: Value,
}

impl ScheduleRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            data: get(row, "data")?,
        })
    }

    pub fn into_schedule(self) -> StoreResult<SurgeSchedule> {
        from_json(self.data)
    }
}

pub(crate) struct BrakeRow {
    pub active: bool,
    pub reason: Option<String>,
    pub engaged_by: Option<String>,
    pub engaged_at: Option<DateTime<Utc>>,
}

impl BrakeRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            active: get(row, "active")?,
            reason: get(row, "reason")?,
            engaged_by: get(row, "engaged_by")?,
            engaged_at: get(row, "engaged_at")?,
        })
    }

    pub fn from_state(state: &BrakeState) -> Self {
        Self {
            active: state.active,
            reason: state.reason.clone(),
            engaged_by: state.engaged_by.as_ref().map(|u| u.as_str().to_string()),
            engaged_at: state.engaged_at,
        }
    }

    pub fn into_state(self) -> BrakeState {
        BrakeState {
            active: self.active,
            reason: self.reason,
            engaged_by: self.engaged_by.map(UserId::new),
            engaged_at: self.engaged_at,
        }
    }
}

pub(crate) struct HexStateRow {
    pub region_id: String,
    pub service_key: String,
    pub h3_index: String,
    pub resolution: i16,
    pub multiplier: f64,
    pub additive_fee_cents: i64,
    pub source: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub profile_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl HexStateRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            region_id: get(row, "region_id")?,
            service_key: get(row, "service_key")?,
            h3_index: get(row, "h3_index")?,
            resolution: get(row, "resolution")?,
            multiplier: get(row, "multiplier")?,
            additive_fee_cents: get(row, "additive_fee_cents")?,
            source: get(row, "source")?,
            valid_from: get(row, "valid_from")?,
            valid_until: get(row, "valid_until")?,
            profile_id: get(row, "profile_id")?,
            schedule_id: get(row, "schedule_id")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    pub fn from_state(state: &SurgeHexState) -> Self {
        Self {
            region_id: state.key.region_id.to_string(),
            service_key: state.key.service_key.to_string(),
            h3_index: state.key.h3_index.to_string(),
            resolution: i16::from(state.key.resolution),
            multiplier: state.multiplier,
            additive_fee_cents: state.additive_fee_cents,
            source: state.source.as_str().to_string(),
            valid_from: state.valid_from,
            valid_until: state.valid_until,
            profile_id: state.profile_id.map(|id| *id.as_uuid()),
            schedule_id: state.schedule_id.map(|id| *id.as_uuid()),
            updated_at: state.updated_at,
        }
    }

    pub fn into_state(self) -> StoreResult<SurgeHexState> {
        Ok(SurgeHexState {
            key: HexStateKey {
                region_id: RegionId::new(self.region_id),
                service_key: ServiceKey::new(self.service_key),
                h3_index: H3Index::new(self.h3_index),
                resolution: u8::try_from(self.resolution)
                    .map_err(|_| StoreError::Serialization("resolution out of range".into()))?,
            },
            multiplier: self.multiplier,
            additive_fee_cents: self.additive_fee_cents,
            source: text_to_enum(self.source)?,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            profile_id: self.profile_id.map(ProfileId::from_uuid),
            schedule_id: self.schedule_id.map(ScheduleId::from_uuid),
            updated_at: self.updated_at,
        })
    }
}

pub(crate) struct AuditRow {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: String,
    pub action: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub region_id: Option<String>,
    pub service_key: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRow {
    pub fn from_row(row: &PgRow) -> StoreResult<Self> {
        Ok(Self {
            id: get(row, "id")?,
            entity_type: get(row, "entity_type")?,
            entity_id: get(row, "entity_id")?,
            actor: get(row, "actor")?,
            action: get(row, "action")?,
            old_value: get(row, "old_value")?,
            new_value: get(row, "new_value")?,
            region_id: get(row, "region_id")?,
            service_key: get(row, "service_key")?,
            reason: get(row, "reason")?,
            created_at: get(row, "created_at")?,
        })
    }

    pub fn from_entry(entry: &AuditLogEntry) -> Self {
        Self {
            id: *entry.id.as_uuid(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            actor: entry.actor.to_string(),
            action: entry.action.as_str().to_string(),
            old_value: entry.old_value.clone(),
            new_value: entry.new_value.clone(),
            region_id: entry.region_id.as_ref().map(ToString::to_string),
            service_key: entry.service_key.as_ref().map(ToString::to_string),
            reason: entry.reason.clone(),
            created_at: entry.created_at,
        }
    }

    pub fn into_entry(self) -> StoreResult<AuditLogEntry> {
        let action = AuditAction::parse(&self.action).ok_or_else(|| {
            StoreError::Serialization(format!("unknown audit action `{}`", self.action))
        })?;
        Ok(AuditLogEntry {
            id: AuditEntryId::from_uuid(self.id),
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor: UserId::new(self.actor),
            action,
            old_value: self.old_value,
            new_value: self.new_value,
            region_id: self.region_id.map(RegionId::new),
            service_key: self.service_key.map(ServiceKey::new),
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgov_types::{ComponentKind, HexSource, ProfileStatus};

    #[test]
    fn enum_text_uses_serde_names() {
        assert_eq!(enum_to_text(&ComponentKind::PerKm).unwrap(), "per_km");
        assert_eq!(enum_to_text(&ProfileStatus::Superseded).unwrap(), "superseded");
        let source: HexSource = text_to_enum("scheduled".to_string()).unwrap();
        assert_eq!(source, HexSource::Scheduled);
        assert!(text_to_enum::<HexSource>("bogus".to_string()).is_err());
    }

    #[test]
    fn component_row_round_trip() {
        let component = PricingComponent::new("Airport", ComponentKind::Flat, 500);
        let row = ComponentRow::from_component("airport", &component).unwrap();
        assert_eq!(row.kind, "flat");
        let (key, back) = row.into_entry().unwrap();
        assert_eq!(key, "airport");
        assert_eq!(back, component);
    }

    #[test]
    fn brake_row_keeps_the_engaging_operator() {
        let state = BrakeState::engaged("incident", UserId::new("ops-lead"), Utc::now());
        let row = BrakeRow::from_state(&state);
        assert_eq!(row.engaged_by.as_deref(), Some("ops-lead"));
        assert_eq!(row.into_state(), state);
    }
}
