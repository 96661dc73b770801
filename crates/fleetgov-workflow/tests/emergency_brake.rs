//! Emergency brake interaction with activation.

mod common;

use chrono::Duration;
use common::{admin, harness, start};
use fleetgov_store::GovernanceStore;
use fleetgov_types::{AuditAction, AuditQuery, ProposalStatus, Role, RoleDraft, UserId};
use fleetgov_workflow::ProposalOptions;

async fn role_with_pending_change(h: &common::Harness) -> (Role, fleetgov_types::ChangeProposal) {
    let user = admin("req", &[]);
    let role = h
        .service
        .create_role(&user, RoleDraft::new("dispatcher", 20))
        .await
        .unwrap();
    let proposal = h
        .service
        .propose_role_change(
            &user,
            role.id,
            RoleDraft::new("dispatcher", 30),
            ProposalOptions::default(),
        )
        .await
        .unwrap();
    (role, proposal)
}

#[tokio::test]
async fn engaged_brake_blocks_activation_until_release() {
    let h = harness();
    let (role, proposal) = role_with_pending_change(&h).await;
    let operator = admin("ops", &[]);

    let state = h
        .service
        .engage_brake(&operator, "pricing incident")
        .await
        .unwrap();
    assert!(state.active);
    assert_eq!(state.reason.as_deref(), Some("pricing incident"));

    h.service
        .approve_proposal(&admin("a1", &[]), &proposal.id)
        .await
        .unwrap();
    let blocked = h
        .service
        .approve_proposal(&admin("a2", &[]), &proposal.id)
        .await
        .unwrap();
    assert_eq!(blocked.status, ProposalStatus::Pending);
    assert!(blocked.emergency_blocked);
    assert_eq!(blocked.approval_count(), 2);
    assert_eq!(
        h.service.get_role(&operator, &role.id).await.unwrap().level,
        20
    );

    // Re-checking while engaged changes nothing
    let rechecked = h
        .service
        .recheck_proposal(&operator, &proposal.id)
        .await
        .unwrap();
    assert_eq!(rechecked.status, ProposalStatus::Pending);
    assert_eq!(rechecked.version, blocked.version);

    let (state, reevaluated) = h.service.release_brake(&operator).await.unwrap();
    assert!(!state.active);
    assert_eq!(reevaluated.len(), 1);
    assert_eq!(reevaluated[0].status, ProposalStatus::Active);
    assert!(!reevaluated[0].emergency_blocked);
    assert_eq!(
        h.service.get_role(&operator, &role.id).await.unwrap().level,
        30
    );
}

#[tokio::test]
async fn late_approver_triggers_a_recheck_without_counting() {
    let h = harness();
    let (role, proposal) = role_with_pending_change(&h).await;
    let operator = admin("ops", &[]);

    h.service.engage_brake(&operator, "audit").await.unwrap();
    for approver in ["a1", "a2"] {
        h.service
            .approve_proposal(&admin(approver, &[]), &proposal.id)
            .await
            .unwrap();
    }

    // Release the flag directly so the blocked proposal is left for a re-check.
    h.service
        .brake()
        .release(&operator.user_id)
        .await
        .unwrap();

    let activated = h
        .service
        .approve_proposal(&admin("a3", &[]), &proposal.id)
        .await
        .unwrap();
    assert_eq!(activated.status, ProposalStatus::Active);
    assert_eq!(activated.approval_count(), 2);
    assert_eq!(
        h.service.get_role(&operator, &role.id).await.unwrap().level,
        30
    );
}

#[tokio::test]
async fn proposals_can_be_filed_while_braked() {
    let h = harness();
    let operator = admin("ops", &[]);
    h.service.engage_brake(&operator, "drill").await.unwrap();

    let (_, proposal) = role_with_pending_change(&h).await;
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert!(proposal.emergency_blocked);

    // Below threshold the release only clears the flag
    let (_, reevaluated) = h.service.release_brake(&operator).await.unwrap();
    assert_eq!(reevaluated.len(), 1);
    assert_eq!(reevaluated[0].status, ProposalStatus::Pending);
    assert!(!reevaluated[0].emergency_blocked);
}

#[tokio::test]
async fn brake_changes_are_audited() {
    let h = harness();
    let operator = admin("ops", &[]);
    let mut changes = h.service.brake().subscribe();

    h.service.engage_brake(&operator, "incident").await.unwrap();
    assert!(changes.has_changed().unwrap());
    assert!(changes.borrow_and_update().active);

    h.service.release_brake(&operator).await.unwrap();
    // Releasing twice is a no-op
    h.service.release_brake(&operator).await.unwrap();

    let engaged = h
        .service
        .query_audit(
            &operator,
            &AuditQuery::new().with_action(AuditAction::BrakeEngaged),
        )
        .await
        .unwrap();
    let released = h
        .service
        .query_audit(
            &operator,
            &AuditQuery::new().with_action(AuditAction::BrakeReleased),
        )
        .await
        .unwrap();
    assert_eq!(engaged.len(), 1);
    assert_eq!(released.len(), 1);
    assert_eq!(engaged[0].reason.as_deref(), Some("incident"));
}

#[tokio::test]
async fn brake_engaged_by_another_process_holds_back_due_activations() {
    let h = harness();
    let user = admin("req", &[]);
    let role = h
        .service
        .create_role(&user, RoleDraft::new("dispatcher", 20))
        .await
        .unwrap();
    let proposal = h
        .service
        .propose_role_change(
            &user,
            role.id,
            RoleDraft::new("dispatcher", 30),
            ProposalOptions::default().effective_at(start() + Duration::hours(1)),
        )
        .await
        .unwrap();
    for approver in ["a1", "a2"] {
        h.service
            .approve_proposal(&admin(approver, &[]), &proposal.id)
            .await
            .unwrap();
    }

    let console = h.second_process();
    let operator = admin("ops", &[]);
    console
        .engage_brake(&operator, "fare incident")
        .await
        .unwrap();
    assert!(h.service.brake_status().await.unwrap().active);

    h.clock.advance(Duration::hours(2));
    let scheduler = h.second_process();
    let report = scheduler
        .activate_due_proposals(&UserId::new("scheduler"))
        .await
        .unwrap();
    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());

    let held = h.store.get_proposal(&proposal.id).await.unwrap().unwrap();
    assert_eq!(held.status, ProposalStatus::Approved);
    assert!(held.emergency_blocked);
    assert_eq!(h.store.get_role(&role.id).await.unwrap().unwrap().level, 20);

    let (state, reevaluated) = console.release_brake(&operator).await.unwrap();
    assert!(!state.active);
    assert_eq!(reevaluated.len(), 1);
    assert_eq!(reevaluated[0].status, ProposalStatus::Active);
    assert_eq!(h.store.get_role(&role.id).await.unwrap().unwrap().level, 30);
}

#[tokio::test]
async fn final_approval_sees_a_brake_engaged_elsewhere() {
    let h = harness();
    let (role, proposal) = role_with_pending_change(&h).await;
    h.service
        .approve_proposal(&admin("a1", &[]), &proposal.id)
        .await
        .unwrap();

    h.second_process()
        .engage_brake(&admin("ops", &[]), "incident")
        .await
        .unwrap();

    let blocked = h
        .service
        .approve_proposal(&admin("a2", &[]), &proposal.id)
        .await
        .unwrap();
    assert_eq!(blocked.status, ProposalStatus::Pending);
    assert!(blocked.emergency_blocked);
    assert_eq!(h.store.get_role(&role.id).await.unwrap().unwrap().level, 20);
    assert!(h.service.brake().last_observed().active);
}
