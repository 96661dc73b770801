//! Shared fixtures for workflow integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use fleetgov_policy::actions;
use fleetgov_store::InMemoryGovernanceStore;
use fleetgov_types::{ProfileDraft, ProfileStatus, User};
use fleetgov_workflow::{FixedClock, GovernanceService};
use std::sync::Arc;

pub struct Harness {
    pub store: Arc<InMemoryGovernanceStore>,
    pub clock: Arc<FixedClock>,
    pub service: GovernanceService,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).single().unwrap()
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryGovernanceStore::new());
    let clock = Arc::new(FixedClock::new(start()));
    let service = GovernanceService::builder(store.clone())
        .with_clock(clock.clone())
        .build();
    Harness {
        store,
        clock,
        service,
    }
}

impl Harness {
    /// Another service over the same store and clock, as a second process
    /// (the operator console, a scheduler) would build it.
    pub fn second_process(&self) -> GovernanceService {
        GovernanceService::builder(self.store.clone())
            .with_clock(self.clock.clone())
            .build()
    }
}

/// Operator holding every governance permission in the given regions.
pub fn admin(id: &str, regions: &[&str]) -> User {
    let mut user = User::new(id, "admin", 90).with_permissions([
        actions::ROLES_READ,
        actions::ROLES_CREATE,
        actions::ROLES_PROPOSE,
        actions::ROLES_APPROVE,
        actions::ROLES_IMPORT,
        actions::PRICING_READ,
        actions::PRICING_CREATE,
        actions::PRICING_PROPOSE,
        actions::PRICING_APPROVE,
        actions::SURGE_SCHEDULE,
        actions::SURGE_APPROVE,
        actions::SURGE_PROMOTE,
        actions::EMERGENCY_BRAKE,
        actions::AUDIT_READ,
    ]);
    for region in regions {
        user = user.with_region(*region);
    }
    user
}

pub fn economy_profile() -> ProfileDraft {
    ProfileDraft {
        name: "Nairobi economy".into(),
        status: ProfileStatus::Draft,
        currency: "KES".into(),
        base_fare_cents: 10_000,
        per_km_cents: 4_000,
        per_minute_cents: 500,
        minimum_fare_cents: 20_000,
        surge_cap: 3.0,
        components: Default::default(),
        earnings_policy: Default::default(),
    }
}
