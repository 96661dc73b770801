//! Policy gating at the service boundary.

mod common;

use common::{admin, economy_profile, harness};
use fleetgov_policy::actions;
use fleetgov_types::{
    AuditQuery, RegionId, RegionState, Role, RoleDraft, ServiceKey, User,
};
use fleetgov_workflow::{GovernanceError, ProposalOptions};

fn denied_at(err: &GovernanceError) -> &str {
    err.denied_step().unwrap_or("<not a denial>")
}

#[tokio::test]
async fn operations_require_their_permission() {
    let h = harness();
    let viewer = User::new("viewer", "analyst", 20).with_permission(actions::ROLES_READ);

    let err = h
        .service
        .create_role(&viewer, RoleDraft::new("dispatcher", 20))
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "rbac");
    assert_eq!(err.http_status(), 403);

    let err = h
        .service
        .bulk_import_roles(&viewer, &[])
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "rbac");

    let err = h
        .service
        .query_audit(&viewer, &AuditQuery::new())
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "rbac");

    assert!(h.service.list_roles(&viewer).await.unwrap().is_empty());
}

#[tokio::test]
async fn approvals_need_the_entity_specific_permission() {
    let h = harness();
    let requester = admin("req", &[]);
    let role = h
        .service
        .create_role(&requester, RoleDraft::new("support", 10))
        .await
        .unwrap();
    let proposal = h
        .service
        .propose_role_change(
            &requester,
            role.id,
            RoleDraft::new("support", 12),
            ProposalOptions::default(),
        )
        .await
        .unwrap();

    let pricing_lead =
        User::new("pl", "pricing_lead", 60).with_permission(actions::PRICING_APPROVE);
    let err = h
        .service
        .approve_proposal(&pricing_lead, &proposal.id)
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "rbac");

    let stored = h
        .service
        .get_proposal(&requester, &proposal.id)
        .await
        .unwrap();
    assert_eq!(stored.approval_count(), 0);
}

#[tokio::test]
async fn pricing_is_confined_to_assigned_regions() {
    let h = harness();
    let outsider = admin("outsider", &["mombasa"]);
    let err = h
        .service
        .create_profile(
            &outsider,
            RegionId::new("nairobi"),
            ServiceKey::new("economy"),
            economy_profile(),
        )
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "regional");

    let local = admin("local", &["nairobi"]);
    let profile = h
        .service
        .create_profile(
            &local,
            RegionId::new("nairobi"),
            ServiceKey::new("economy"),
            economy_profile(),
        )
        .await
        .unwrap();

    let mut desired = profile.to_draft();
    desired.base_fare_cents += 1_000;
    let err = h
        .service
        .propose_profile_change(&outsider, profile.id, desired, ProposalOptions::default())
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "regional");

    // Proposals outside the user's regions are filtered from listings
    let mut desired = profile.to_draft();
    desired.base_fare_cents += 1_000;
    h.service
        .propose_profile_change(&local, profile.id, desired, ProposalOptions::default())
        .await
        .unwrap();
    assert_eq!(h.service.list_proposals(&local, None).await.unwrap().len(), 1);
    assert!(h
        .service
        .list_proposals(&outsider, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn expansion_managers_only_act_in_early_regions() {
    let h = harness();
    h.service
        .set_region_state(RegionId::new("kisumu"), RegionState::Pilot);
    h.service
        .set_region_state(RegionId::new("nairobi"), RegionState::Active);

    let manager = User::new("em", Role::EXPANSION_MANAGER, 40)
        .with_permission(actions::PRICING_CREATE)
        .with_region("kisumu")
        .with_region("nairobi");

    h.service
        .create_profile(
            &manager,
            RegionId::new("kisumu"),
            ServiceKey::new("economy"),
            economy_profile(),
        )
        .await
        .unwrap();

    let err = h
        .service
        .create_profile(
            &manager,
            RegionId::new("nairobi"),
            ServiceKey::new("economy"),
            economy_profile(),
        )
        .await
        .unwrap_err();
    assert_eq!(denied_at(&err), "expansion_scope");
}

#[tokio::test]
async fn pii_actions_are_denied_without_step_up() {
    let h = harness();
    let support = User::new("s1", "support_lead", 50).with_permission(actions::USERS_PII_READ);
    let err = h
        .service
        .authorize(&support, actions::USERS_PII_READ, None)
        .unwrap_err();
    assert_eq!(denied_at(&err), "sensitivity");
}

#[tokio::test]
async fn system_roles_keep_their_name_and_level() {
    let h = harness();
    let admin_user = admin("root", &[]);
    let system = h
        .service
        .seed_system_role(RoleDraft::new("super_admin", 100), &admin_user.user_id)
        .await
        .unwrap();

    let err = h
        .service
        .propose_role_change(
            &admin_user,
            system.id,
            RoleDraft::new("super_admin", 90),
            ProposalOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ValidationFailed { .. }));

    let proposal = h
        .service
        .propose_role_change(
            &admin_user,
            system.id,
            RoleDraft::new("super_admin", 100).with_permission("audit:read"),
            ProposalOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(proposal.needs_approvals, 2);
}
