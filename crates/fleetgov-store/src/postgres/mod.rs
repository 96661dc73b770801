//! PostgreSQL adapter for the governance store.
//!
//! The transactional source of truth. A [`WriteBatch`] runs inside one
//! database transaction: preconditions are checked with row locks, then
//! every write is executed, then the transaction commits. Any error drops
//! the transaction, which rolls it back.

mod rows;

use async_trait::async_trait;
use fleetgov_types::{
    AuditLogEntry, AuditQuery, BrakeState, ChangeProposal, EntityRef, PricingComponent,
    PricingProfile, ProfileId, ProposalId, ProposalStatus, RegionCell, RegionId, Role, RoleId,
    ScheduleId, ScheduleStatus, ServiceKey, SurgeHexState, SurgeSchedule,
};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use self::rows::{
    get, to_i64, to_json, AuditRow, BrakeRow, ComponentRow, EarningsRow, HexStateRow,
    ProfileRow, ProposalRow, RoleRow, ScheduleRow,
};
use crate::batch::{Precondition, Write, WriteBatch};
use crate::traits::GovernanceStore;
use crate::{StoreError, StoreResult};

const ROLE_COLUMNS: &str = "id, name, description, level, permissions, scope, \
    allowed_region_states, is_system, version, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, region_id, service_key, name, status, currency, \
    base_fare_cents, per_km_cents, per_minute_cents, minimum_fare_cents, surge_cap, \
    version, created_at, updated_at";

const HEX_COLUMNS: &str = "region_id, service_key, h3_index, resolution, multiplier, \
    additive_fee_cents, source, valid_from, valid_until, profile_id, schedule_id, updated_at";

/// PostgreSQL-backed governance store.
#[derive(Clone)]
pub struct PostgresGovernanceStore {
    pool: PgPool,
}

impl PostgresGovernanceStore {
    /// Connect and initialize the schema.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create the adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS roles (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                level INTEGER NOT NULL,
                permissions JSONB NOT NULL,
                scope JSONB,
                allowed_region_states JSONB,
                is_system BOOLEAN NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pricing_profiles (
                id UUID PRIMARY KEY,
                region_id TEXT NOT NULL,
                service_key TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                currency TEXT NOT NULL,
                base_fare_cents BIGINT NOT NULL,
                per_km_cents BIGINT NOT NULL,
                per_minute_cents BIGINT NOT NULL,
                minimum_fare_cents BIGINT NOT NULL,
                surge_cap DOUBLE PRECISION NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"CREATE INDEX IF NOT EXISTS pricing_profiles_region ON pricing_profiles(region_id, service_key)"#,
            r#"
            CREATE TABLE IF NOT EXISTS pricing_components (
                profile_id UUID NOT NULL REFERENCES pricing_profiles(id),
                component_key TEXT NOT NULL,
                label TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount BIGINT NOT NULL,
                enabled BOOLEAN NOT NULL,
                PRIMARY KEY (profile_id, component_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS earnings_policies (
                profile_id UUID PRIMARY KEY REFERENCES pricing_profiles(id),
                driver_share_pct DOUBLE PRECISION NOT NULL,
                platform_fee_pct DOUBLE PRECISION NOT NULL,
                min_payout_cents BIGINT NOT NULL,
                incentive_pool_pct DOUBLE PRECISION
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS change_proposals (
                id UUID PRIMARY KEY,
                entity_kind TEXT NOT NULL,
                entity_id UUID NOT NULL,
                status TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS change_proposals_one_pending
                ON change_proposals(entity_kind, entity_id) WHERE status = 'pending'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS surge_schedules (
                id UUID PRIMARY KEY,
                region_id TEXT NOT NULL,
                service_key TEXT NOT NULL,
                status TEXT NOT NULL,
                starts_at TIMESTAMPTZ NOT NULL,
                ends_at TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL
            )
            "#,
            r#"CREATE INDEX IF NOT EXISTS surge_schedules_status ON surge_schedules(status, starts_at)"#,
            r#"
            CREATE TABLE IF NOT EXISTS region_cells (
                region_id TEXT NOT NULL,
                h3_index TEXT NOT NULL,
                resolution SMALLINT NOT NULL,
                PRIMARY KEY (region_id, resolution, h3_index)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS surge_hex_states (
                region_id TEXT NOT NULL,
                service_key TEXT NOT NULL,
                h3_index TEXT NOT NULL,
                resolution SMALLINT NOT NULL,
                multiplier DOUBLE PRECISION NOT NULL,
                additive_fee_cents BIGINT NOT NULL,
                source TEXT NOT NULL,
                valid_from TIMESTAMPTZ NOT NULL,
                valid_until TIMESTAMPTZ,
                profile_id UUID,
                schedule_id UUID,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (region_id, service_key, h3_index, resolution)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                sequence BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                old_value JSONB,
                new_value JSONB,
                region_id TEXT,
                service_key TEXT,
                reason TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"CREATE INDEX IF NOT EXISTS audit_log_created ON audit_log(created_at DESC)"#,
            r#"
            CREATE TABLE IF NOT EXISTS emergency_brake (
                id SMALLINT PRIMARY KEY CHECK (id = 1),
                active BOOLEAN NOT NULL,
                reason TEXT,
                engaged_by TEXT,
                engaged_at TIMESTAMPTZ
            )
            "#,
            r#"INSERT INTO emergency_brake (id, active) VALUES (1, FALSE) ON CONFLICT (id) DO NOTHING"#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn load_profile(&self, header: ProfileRow) -> StoreResult<PricingProfile> {
        let component_rows = sqlx::query(
            "SELECT component_key, label, kind, amount, enabled \
               FROM pricing_components WHERE profile_id = $1 ORDER BY component_key",
        )
        .bind(header.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let components = component_rows
            .iter()
            .map(|row| ComponentRow::from_row(row)?.into_entry())
            .collect::<StoreResult<BTreeMap<String, PricingComponent>>>()?;

        let earnings = sqlx::query(
            "SELECT driver_share_pct, platform_fee_pct, min_payout_cents, incentive_pool_pct \
               FROM earnings_policies WHERE profile_id = $1",
        )
        .bind(header.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(|row| EarningsRow::from_row(&row).map(EarningsRow::into_policy))
        .transpose()?
        .unwrap_or_default();

        header.into_profile(components, earnings)
    }

    async fn check(conn: &mut PgConnection, precondition: &Precondition) -> StoreResult<bool> {
        let locked_version = |table: &'static str| {
            format!("SELECT version FROM {table} WHERE id = $1 FOR UPDATE")
        };

        let (sql, id, expected) = match precondition {
            Precondition::RoleVersion { id, version } => {
                (locked_version("roles"), *id.as_uuid(), *version)
            }
            Precondition::ProfileVersion { id, version } => {
                (locked_version("pricing_profiles"), *id.as_uuid(), *version)
            }
            Precondition::ProposalVersion { id, version } => {
                (locked_version("change_proposals"), *id.as_uuid(), *version)
            }
            Precondition::ScheduleVersion { id, version } => {
                (locked_version("surge_schedules"), *id.as_uuid(), *version)
            }
            Precondition::NoPendingProposal { entity, except } => {
                let (kind, entity_id) = entity_parts(entity);
                let row = sqlx::query(
                    "SELECT id FROM change_proposals \
                      WHERE entity_kind = $1 AND entity_id = $2 AND status = 'pending' \
                        AND ($3::UUID IS NULL OR id <> $3) \
                      FOR UPDATE",
                )
                .bind(kind)
                .bind(entity_id)
                .bind(except.map(|id| *id.as_uuid()))
                .fetch_optional(&mut *conn)
                .await
                .map_err(backend)?;
                return Ok(row.is_none());
            }
            Precondition::RoleNameAvailable(name) => {
                let row = sqlx::query("SELECT id FROM roles WHERE name = $1 FOR UPDATE")
                    .bind(name)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(backend)?;
                return Ok(row.is_none());
            }
            // FOR SHARE: concurrent activations proceed together, a brake
            // write waits for them and they wait for it.
            Precondition::BrakeReleased | Precondition::BrakeEngaged => {
                let row = sqlx::query("SELECT active FROM emergency_brake WHERE id = 1 FOR SHARE")
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(backend)?;
                let active = match row {
                    Some(row) => get::<bool>(&row, "active")?,
                    None => false,
                };
                return Ok(active == matches!(precondition, Precondition::BrakeEngaged));
            }
        };

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(get::<i64>(&row, "version")? == to_i64(expected)?),
            None => Ok(false),
        }
    }

    async fn apply(conn: &mut PgConnection, write: Write) -> StoreResult<()> {
        match write {
            Write::InsertRole(role) => {
                let row = RoleRow::from_role(&role)?;
                sqlx::query(
                    r#"
                    INSERT INTO roles
                        (id, name, description, level, permissions, scope,
                         allowed_region_states, is_system, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(row.id)
                .bind(row.name)
                .bind(row.description)
                .bind(row.level)
                .bind(row.permissions)
                .bind(row.scope)
                .bind(row.allowed_region_states)
                .bind(row.is_system)
                .bind(row.version)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_conflict)?;
            }
            Write::UpdateRole(role) => {
                let row = RoleRow::from_role(&role)?;
                let result = sqlx::query(
                    r#"
                    UPDATE roles
                       SET name = $2, description = $3, level = $4, permissions = $5,
                           scope = $6, allowed_region_states = $7, is_system = $8,
                           version = $9, updated_at = $10
                     WHERE id = $1
                    "#,
                )
                .bind(row.id)
                .bind(row.name)
                .bind(row.description)
                .bind(row.level)
                .bind(row.permissions)
                .bind(row.scope)
                .bind(row.allowed_region_states)
                .bind(row.is_system)
                .bind(row.version)
                .bind(row.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_conflict)?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(format!("{} not found", role.id)));
                }
            }
            Write::InsertProfile(profile) => {
                let row = ProfileRow::from_profile(&profile)?;
                sqlx::query(
                    r#"
                    INSERT INTO pricing_profiles
                        (id, region_id, service_key, name, status, currency, base_fare_cents,
                         per_km_cents, per_minute_cents, minimum_fare_cents, surge_cap,
                         version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    "#,
                )
                .bind(row.id)
                .bind(row.region_id)
                .bind(row.service_key)
                .bind(row.name)
                .bind(row.status)
                .bind(row.currency)
                .bind(row.base_fare_cents)
                .bind(row.per_km_cents)
                .bind(row.per_minute_cents)
                .bind(row.minimum_fare_cents)
                .bind(row.surge_cap)
                .bind(row.version)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_conflict)?;

                for (key, component) in &profile.components {
                    upsert_component(conn, profile.id, key, component).await?;
                }
                upsert_earnings(conn, profile.id, &profile.earnings_policy).await?;
            }
            Write::UpdateProfileHeader(profile) => {
                let row = ProfileRow::from_profile(&profile)?;
                let result = sqlx::query(
                    r#"
                    UPDATE pricing_profiles
                       SET name = $2, status = $3, currency = $4, base_fare_cents = $5,
                           per_km_cents = $6, per_minute_cents = $7, minimum_fare_cents = $8,
                           surge_cap = $9, version = $10, updated_at = $11
                     WHERE id = $1
                    "#,
                )
                .bind(row.id)
                .bind(row.name)
                .bind(row.status)
                .bind(row.currency)
                .bind(row.base_fare_cents)
                .bind(row.per_km_cents)
                .bind(row.per_minute_cents)
                .bind(row.minimum_fare_cents)
                .bind(row.surge_cap)
                .bind(row.version)
                .bind(row.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(format!("{} not found", profile.id)));
                }
            }
            Write::UpsertComponent {
                profile_id,
                key,
                component,
            } => upsert_component(conn, profile_id, &key, &component).await?,
            Write::DeleteComponent { profile_id, key } => {
                sqlx::query(
                    "DELETE FROM pricing_components WHERE profile_id = $1 AND component_key = $2",
                )
                .bind(profile_id.as_uuid())
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            }
            Write::UpsertEarnings { profile_id, policy } => {
                upsert_earnings(conn, profile_id, &policy).await?
            }
            Write::PutProposal(proposal) => put_proposal(conn, &proposal).await?,
            Write::PutSchedule(schedule) => {
                sqlx::query(
                    r#"
                    INSERT INTO surge_schedules
                        (id, region_id, service_key, status, starts_at, ends_at, version, data)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (id) DO UPDATE SET
                        status = EXCLUDED.status,
                        starts_at = EXCLUDED.starts_at,
                        ends_at = EXCLUDED.ends_at,
                        version = EXCLUDED.version,
                        data = EXCLUDED.data
                    "#,
                )
                .bind(schedule.id.as_uuid())
                .bind(schedule.region_id.as_str())
                .bind(schedule.service_key.as_str())
                .bind(schedule.status.as_str())
                .bind(schedule.starts_at)
                .bind(schedule.ends_at)
                .bind(to_i64(schedule.version)?)
                .bind(to_json(&schedule)?)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            }
            Write::UpsertHexState(state) => {
                let row = HexStateRow::from_state(&state);
                sqlx::query(
                    r#"
                    INSERT INTO surge_hex_states
                        (region_id, service_key, h3_index, resolution, multiplier,
                         additive_fee_cents, source, valid_from, valid_until, profile_id,
                         schedule_id, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (region_id, service_key, h3_index, resolution) DO UPDATE SET
                        multiplier = EXCLUDED.multiplier,
                        additive_fee_cents = EXCLUDED.additive_fee_cents,
                        source = EXCLUDED.source,
                        valid_from = EXCLUDED.valid_from,
                        valid_until = EXCLUDED.valid_until,
                        profile_id = EXCLUDED.profile_id,
                        schedule_id = EXCLUDED.schedule_id,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(row.region_id)
                .bind(row.service_key)
                .bind(row.h3_index)
                .bind(row.resolution)
                .bind(row.multiplier)
                .bind(row.additive_fee_cents)
                .bind(row.source)
                .bind(row.valid_from)
                .bind(row.valid_until)
                .bind(row.profile_id)
                .bind(row.schedule_id)
                .bind(row.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            }
            Write::SetBrake(state) => {
                let row = BrakeRow::from_state(&state);
                sqlx::query(
                    r#"
                    INSERT INTO emergency_brake (id, active, reason, engaged_by, engaged_at)
                    VALUES (1, $1, $2, $3, $4)
                    ON CONFLICT (id) DO UPDATE SET
                        active = EXCLUDED.active,
                        reason = EXCLUDED.reason,
                        engaged_by = EXCLUDED.engaged_by,
                        engaged_at = EXCLUDED.engaged_at
                    "#,
                )
                .bind(row.active)
                .bind(row.reason)
                .bind(row.engaged_by)
                .bind(row.engaged_at)
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
            }
            Write::AppendAudit(entry) => {
                let row = AuditRow::from_entry(&entry);
                sqlx::query(
                    r#"
                    INSERT INTO audit_log
                        (id, entity_type, entity_id, actor, action, old_value, new_value,
                         region_id, service_key, reason, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(row.id)
                .bind(row.entity_type)
                .bind(row.entity_id)
                .bind(row.actor)
                .bind(row.action)
                .bind(row.old_value)
                .bind(row.new_value)
                .bind(row.region_id)
                .bind(row.service_key)
                .bind(row.reason)
                .bind(row.created_at)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_conflict)?;
            }
        }
        Ok(())
    }
}

async fn upsert_component(
    conn: &mut PgConnection,
    profile_id: ProfileId,
    key: &str,
    component: &PricingComponent,
) -> StoreResult<()> {
    let row = ComponentRow::from_component(key, component)?;
    sqlx::query(
        r#"
        INSERT INTO pricing_components (profile_id, component_key, label, kind, amount, enabled)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (profile_id, component_key) DO UPDATE SET
            label = EXCLUDED.label,
            kind = EXCLUDED.kind,
            amount = EXCLUDED.amount,
            enabled = EXCLUDED.enabled
        "#,
    )
    .bind(profile_id.as_uuid())
    .bind(row.component_key)
    .bind(row.label)
    .bind(row.kind)
    .bind(row.amount)
    .bind(row.enabled)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(())
}

async fn upsert_earnings(
    conn: &mut PgConnection,
    profile_id: ProfileId,
    policy: &fleetgov_types::EarningsPolicy,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO earnings_policies
            (profile_id, driver_share_pct, platform_fee_pct, min_payout_cents, incentive_pool_pct)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (profile_id) DO UPDATE SET
            driver_share_pct = EXCLUDED.driver_share_pct,
            platform_fee_pct = EXCLUDED.platform_fee_pct,
            min_payout_cents = EXCLUDED.min_payout_cents,
            incentive_pool_pct = EXCLUDED.incentive_pool_pct
        "#,
    )
    .bind(profile_id.as_uuid())
    .bind(policy.driver_share_pct)
    .bind(policy.platform_fee_pct)
    .bind(policy.min_payout_cents)
    .bind(policy.incentive_pool_pct)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(())
}

async fn put_proposal(conn: &mut PgConnection, proposal: &ChangeProposal) -> StoreResult<()> {
    let (kind, entity_id) = entity_parts(&proposal.entity);
    sqlx::query(
        r#"
        INSERT INTO change_proposals
            (id, entity_kind, entity_id, status, requested_by, version, data, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            version = EXCLUDED.version,
            data = EXCLUDED.data,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(proposal.id.as_uuid())
    .bind(kind)
    .bind(entity_id)
    .bind(proposal.status.as_str())
    .bind(proposal.requested_by.as_str())
    .bind(to_i64(proposal.version)?)
    .bind(to_json(proposal)?)
    .bind(proposal.created_at)
    .bind(proposal.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|err| match map_sqlx_conflict(err) {
        // Only the one-pending-per-entity index can collide here.
        StoreError::Conflict(_) => StoreError::PreconditionFailed(Precondition::NoPendingProposal {
            entity: proposal.entity,
            except: None,
        }),
        other => other,
    })?;
    Ok(())
}

#[async_trait]
impl GovernanceStore for PostgresGovernanceStore {
    async fn get_role(&self, id: &RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| RoleRow::from_row(&r)?.into_role()).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| RoleRow::from_row(&r)?.into_role()).transpose()
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY level DESC, name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| RoleRow::from_row(r)?.into_role())
            .collect()
    }

    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<PricingProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM pricing_profiles WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => Ok(Some(self.load_profile(ProfileRow::from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_profiles(&self, region: Option<&RegionId>) -> StoreResult<Vec<PricingProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM pricing_profiles \
              WHERE ($1::TEXT IS NULL OR region_id = $1) ORDER BY updated_at DESC"
        ))
        .bind(region.map(RegionId::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut profiles = Vec::with_capacity(rows.len());
        for row in &rows {
            profiles.push(self.load_profile(ProfileRow::from_row(row)?).await?);
        }
        Ok(profiles)
    }

    async fn get_proposal(&self, id: &ProposalId) -> StoreResult<Option<ChangeProposal>> {
        let row = sqlx::query("SELECT data FROM change_proposals WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| ProposalRow::from_row(&r)?.into_proposal())
            .transpose()
    }

    async fn find_pending_proposal(
        &self,
        entity: &EntityRef,
    ) -> StoreResult<Option<ChangeProposal>> {
        let (kind, entity_id) = entity_parts(entity);
        let row = sqlx::query(
            "SELECT data FROM change_proposals \
              WHERE entity_kind = $1 AND entity_id = $2 AND status = 'pending'",
        )
        .bind(kind)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|r| ProposalRow::from_row(&r)?.into_proposal())
            .transpose()
    }

    async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> StoreResult<Vec<ChangeProposal>> {
        let rows = sqlx::query(
            "SELECT data FROM change_proposals \
              WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| ProposalRow::from_row(r)?.into_proposal())
            .collect()
    }

    async fn get_schedule(&self, id: &ScheduleId) -> StoreResult<Option<SurgeSchedule>> {
        let row = sqlx::query("SELECT data FROM surge_schedules WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| ScheduleRow::from_row(&r)?.into_schedule())
            .transpose()
    }

    async fn list_schedules(
        &self,
        status: Option<ScheduleStatus>,
    ) -> StoreResult<Vec<SurgeSchedule>> {
        let rows = sqlx::query(
            "SELECT data FROM surge_schedules \
              WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY starts_at",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| ScheduleRow::from_row(r)?.into_schedule())
            .collect()
    }

    async fn list_region_cells(
        &self,
        region: &RegionId,
        resolution: u8,
        limit: usize,
    ) -> StoreResult<Vec<RegionCell>> {
        let limit = i64::try_from(limit)
            .map_err(|_| StoreError::InvalidInput("cell limit too large".to_string()))?;
        let rows = sqlx::query(
            "SELECT h3_index FROM region_cells \
              WHERE region_id = $1 AND resolution = $2 ORDER BY h3_index LIMIT $3",
        )
        .bind(region.as_str())
        .bind(i16::from(resolution))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(RegionCell::new(
                    region.clone(),
                    get::<String>(row, "h3_index")?,
                    resolution,
                ))
            })
            .collect()
    }

    async fn put_region_cells(&self, cells: Vec<RegionCell>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for cell in cells {
            sqlx::query(
                "INSERT INTO region_cells (region_id, h3_index, resolution) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(cell.region_id.as_str())
            .bind(cell.h3_index.as_str())
            .bind(i16::from(cell.resolution))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn list_hex_states(
        &self,
        region: &RegionId,
        service: Option<&ServiceKey>,
    ) -> StoreResult<Vec<SurgeHexState>> {
        let rows = sqlx::query(&format!(
            "SELECT {HEX_COLUMNS} FROM surge_hex_states \
              WHERE region_id = $1 AND ($2::TEXT IS NULL OR service_key = $2) \
              ORDER BY service_key, h3_index, resolution"
        ))
        .bind(region.as_str())
        .bind(service.map(ServiceKey::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| HexStateRow::from_row(r)?.into_state())
            .collect()
    }

    async fn get_brake(&self) -> StoreResult<BrakeState> {
        let row = sqlx::query(
            "SELECT active, reason, engaged_by, engaged_at FROM emergency_brake WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => Ok(BrakeRow::from_row(&row)?.into_state()),
            None => Ok(BrakeState::released()),
        }
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        let limit = query
            .limit
            .map(|l| {
                i64::try_from(l)
                    .map_err(|_| StoreError::InvalidInput("audit limit too large".to_string()))
            })
            .transpose()?;
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, actor, action, old_value, new_value,
                   region_id, service_key, reason, created_at
              FROM audit_log
             WHERE ($1::TEXT IS NULL OR region_id = $1)
               AND ($2::TEXT IS NULL OR service_key = $2)
               AND ($3::TEXT IS NULL OR action = $3)
               AND ($4::TEXT IS NULL OR actor = $4)
               AND ($5::TEXT IS NULL OR entity_type = $5)
               AND ($6::TEXT IS NULL OR entity_id = $6)
               AND ($7::TIMESTAMPTZ IS NULL OR created_at >= $7)
               AND ($8::TIMESTAMPTZ IS NULL OR created_at <= $8)
             ORDER BY created_at DESC, sequence DESC
             LIMIT $9
            "#,
        )
        .bind(query.region_id.as_ref().map(RegionId::as_str))
        .bind(query.service_key.as_ref().map(ServiceKey::as_str))
        .bind(query.action.map(|a| a.as_str()))
        .bind(query.actor.as_ref().map(|a| a.as_str()))
        .bind(query.entity_type.as_deref())
        .bind(query.entity_id.as_deref())
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| AuditRow::from_row(r)?.into_entry())
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for precondition in &batch.preconditions {
            if !Self::check(&mut *tx, precondition).await? {
                return Err(StoreError::PreconditionFailed(precondition.clone()));
            }
        }

        let writes = batch.writes.len();
        for write in batch.writes {
            Self::apply(&mut *tx, write).await?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(writes, "committed governance batch");
        Ok(())
    }
}

fn entity_parts(entity: &EntityRef) -> (&'static str, Uuid) {
    let id = match entity {
        EntityRef::Role(id) => *id.as_uuid(),
        EntityRef::PricingProfile(id) => *id.as_uuid(),
    };
    (entity.kind().as_str(), id)
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}
