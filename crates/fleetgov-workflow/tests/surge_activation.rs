//! Surge schedule promotion and expiry.

mod common;

use chrono::Duration;
use common::{admin, harness, start, Harness};
use fleetgov_store::GovernanceStore;
use fleetgov_types::{
    AuditAction, AuditQuery, H3Index, HexSource, RegionCell, RegionId, ScheduleDraft,
    ScheduleStatus, ServiceKey, SurgeSchedule, UserId,
};
use fleetgov_workflow::{GovernanceConfig, GovernanceError, GovernanceService, SurgeConfig};
use std::collections::BTreeSet;

const CELLS: [&str; 3] = ["882a100d25fffff", "882a100d27fffff", "882a100d2bfffff"];

async fn seed_cells(h: &Harness) {
    h.store
        .put_region_cells(
            CELLS
                .iter()
                .map(|cell| RegionCell::new("nairobi", *cell, 8))
                .collect(),
        )
        .await
        .unwrap();
}

fn draft(service: &str, offset_minutes: i64) -> ScheduleDraft {
    let starts_at = start() + Duration::minutes(offset_minutes);
    ScheduleDraft {
        region_id: RegionId::new("nairobi"),
        service_key: ServiceKey::new(service),
        multiplier: 1.8,
        additive_fee_cents: 5_000,
        h3_indexes: None,
        resolution: None,
        profile_id: None,
        starts_at,
        ends_at: starts_at + Duration::hours(2),
    }
}

async fn approved(h: &Harness, draft: ScheduleDraft) -> SurgeSchedule {
    let planner = admin("planner", &["nairobi"]);
    let schedule = h.service.create_schedule(&planner, draft).await.unwrap();
    h.service
        .approve_schedule(&admin("lead", &["nairobi"]), &schedule.id)
        .await
        .unwrap()
}

#[tokio::test]
async fn promotion_writes_one_row_per_cell_exactly_once() {
    let h = harness();
    seed_cells(&h).await;
    let schedule = approved(&h, draft("economy", -5)).await;
    let user = admin("ops", &["nairobi"]);

    let result = h
        .service
        .promote_schedule(&user, &schedule.id)
        .await
        .unwrap();
    assert_eq!(result.schedule_id, schedule.id);
    assert_eq!(result.cells_updated, 3);
    assert_eq!(result.activated_at, start());

    let rows = h
        .store
        .list_hex_states(&RegionId::new("nairobi"), Some(&ServiceKey::new("economy")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.source == HexSource::Scheduled));
    assert!(rows.iter().all(|row| row.schedule_id == Some(schedule.id)));
    assert!(rows.iter().all(|row| (row.multiplier - 1.8).abs() < f64::EPSILON));

    let stored = h.service.get_schedule(&user, &schedule.id).await.unwrap();
    assert_eq!(stored.status, ScheduleStatus::Active);
    assert_eq!(stored.activated_at, Some(start()));

    let audit_after_first = h.store.audit_len();
    let err = h
        .service
        .promote_schedule(&user, &schedule.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidState(_)));
    assert_eq!(err.http_status(), 400);
    assert_eq!(h.store.audit_len(), audit_after_first);
    assert_eq!(
        h.store
            .list_hex_states(&RegionId::new("nairobi"), None)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn promotion_before_start_is_too_early() {
    let h = harness();
    seed_cells(&h).await;
    let schedule = approved(&h, draft("economy", 30)).await;
    let trigger = UserId::new("scheduler");

    let err = h
        .service
        .trigger_promotion(&schedule.id, &trigger)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::TooEarly(_)));
    assert!(err.is_retryable());
    assert!(h
        .store
        .list_hex_states(&RegionId::new("nairobi"), None)
        .await
        .unwrap()
        .is_empty());

    h.clock.advance(Duration::minutes(31));
    let result = h
        .service
        .trigger_promotion(&schedule.id, &trigger)
        .await
        .unwrap();
    assert_eq!(result.cells_updated, 3);
}

#[tokio::test]
async fn pending_schedules_cannot_be_promoted() {
    let h = harness();
    let planner = admin("planner", &["nairobi"]);
    let schedule = h
        .service
        .create_schedule(&planner, draft("economy", -5))
        .await
        .unwrap();

    let err = h
        .service
        .trigger_promotion(&schedule.id, &UserId::new("scheduler"))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidState(_)));
}

#[tokio::test]
async fn unknown_schedule_is_not_found() {
    let h = harness();
    let err = h
        .service
        .trigger_promotion(&fleetgov_types::ScheduleId::generate(), &UserId::new("scheduler"))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn region_wide_taxi_surge_writes_no_cells() {
    let h = harness();
    seed_cells(&h).await;
    let schedule = approved(&h, draft(ServiceKey::TAXI, -5)).await;

    let result = h
        .service
        .trigger_promotion(&schedule.id, &UserId::new("scheduler"))
        .await
        .unwrap();
    assert_eq!(result.cells_updated, 0);
    assert!(h
        .store
        .list_hex_states(&RegionId::new("nairobi"), None)
        .await
        .unwrap()
        .is_empty());

    let stored = h.store.get_schedule(&schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Active);
}

#[tokio::test]
async fn explicit_cells_apply_even_to_excluded_services() {
    let h = harness();
    let mut taxi = draft(ServiceKey::TAXI, -5);
    taxi.h3_indexes = Some(
        [H3Index::new("882a100d25fffff"), H3Index::new("882a100d2dfffff")]
            .into_iter()
            .collect::<BTreeSet<_>>(),
    );
    let schedule = approved(&h, taxi).await;

    let result = h
        .service
        .trigger_promotion(&schedule.id, &UserId::new("scheduler"))
        .await
        .unwrap();
    assert_eq!(result.cells_updated, 2);
}

#[tokio::test]
async fn region_wide_promotion_is_capped() {
    let store = std::sync::Arc::new(fleetgov_store::InMemoryGovernanceStore::new());
    let clock = std::sync::Arc::new(fleetgov_workflow::FixedClock::new(start()));
    let config = GovernanceConfig {
        surge: SurgeConfig {
            region_wide_hex_limit: 2,
            ..SurgeConfig::default()
        },
        ..GovernanceConfig::default()
    };
    let service = GovernanceService::builder(store.clone())
        .with_clock(clock.clone())
        .with_config(config)
        .build();
    let h = Harness {
        store,
        clock,
        service,
    };
    seed_cells(&h).await;
    let schedule = approved(&h, draft("economy", -5)).await;

    let result = h
        .service
        .trigger_promotion(&schedule.id, &UserId::new("scheduler"))
        .await
        .unwrap();
    assert_eq!(result.cells_updated, 2);
}

#[tokio::test]
async fn failed_promotion_leaves_the_schedule_approved() {
    let h = harness();
    seed_cells(&h).await;
    let schedule = approved(&h, draft("economy", -5)).await;
    let trigger = UserId::new("scheduler");

    h.store.fail_next_commits(1);
    let err = h
        .service
        .trigger_promotion(&schedule.id, &trigger)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ActivationFailed(_)));
    assert!(h
        .store
        .list_hex_states(&RegionId::new("nairobi"), None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        h.store.get_schedule(&schedule.id).await.unwrap().unwrap().status,
        ScheduleStatus::Approved
    );

    let result = h.service.trigger_promotion(&schedule.id, &trigger).await.unwrap();
    assert_eq!(result.cells_updated, 3);
}

#[tokio::test]
async fn sweeps_promote_and_expire_due_schedules() {
    let h = harness();
    seed_cells(&h).await;
    let due = approved(&h, draft("economy", -5)).await;
    let later = approved(&h, draft("comfort", 60)).await;
    let trigger = UserId::new("scheduler");

    let report = h.service.promote_due(&trigger).await.unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].schedule_id, due.id);
    assert!(report.failed.is_empty());

    // Running the sweep again finds nothing new
    let report = h.service.promote_due(&trigger).await.unwrap();
    assert!(report.succeeded.is_empty());

    h.clock.advance(Duration::hours(2));
    let report = h.service.promote_due(&trigger).await.unwrap();
    assert_eq!(report.succeeded[0].schedule_id, later.id);

    let expired = h.service.expire_due(&trigger).await.unwrap();
    assert_eq!(expired.succeeded, vec![due.id]);
    assert_eq!(
        h.store.get_schedule(&due.id).await.unwrap().unwrap().status,
        ScheduleStatus::Expired
    );

    let activations = h
        .service
        .query_audit(
            &admin("auditor", &["nairobi"]),
            &AuditQuery::new()
                .with_region("nairobi")
                .with_action(AuditAction::ScheduleActivated),
        )
        .await
        .unwrap();
    assert_eq!(activations.len(), 2);
}

#[tokio::test]
async fn engaged_brake_holds_promotion_back() {
    let h = harness();
    seed_cells(&h).await;
    let schedule = approved(&h, draft("economy", -5)).await;
    let operator = admin("ops", &["nairobi"]);
    let trigger = UserId::new("scheduler");

    h.second_process()
        .engage_brake(&operator, "surge incident")
        .await
        .unwrap();

    let err = h
        .service
        .trigger_promotion(&schedule.id, &trigger)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::EmergencyBrake(_)));
    assert!(err.is_retryable());

    // The sweep skips it without reporting a failure
    let report = h.service.promote_due(&trigger).await.unwrap();
    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        h.store.get_schedule(&schedule.id).await.unwrap().unwrap().status,
        ScheduleStatus::Approved
    );
    assert!(h
        .store
        .list_hex_states(&RegionId::new("nairobi"), None)
        .await
        .unwrap()
        .is_empty());

    h.service.release_brake(&operator).await.unwrap();
    let report = h.service.promote_due(&trigger).await.unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].cells_updated, 3);
}
