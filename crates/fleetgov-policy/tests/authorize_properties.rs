//! Property tests: decision table of the authorization pipeline.

use fleetgov_policy::{PolicyEngine, PolicyStep, ResourceContext};
use fleetgov_types::{RegionState, User};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_action() -> impl Strategy<Value = String> {
    "[a-z]{3,8}:[a-z]{3,8}"
}

fn arb_standard_action() -> impl Strategy<Value = String> {
    arb_action().prop_filter("standard actions only", |a| {
        !a.contains("pii") && !a.contains("unmask")
    })
}

fn arb_sensitive_action() -> impl Strategy<Value = String> {
    ("[a-z]{2,6}", prop_oneof![Just("pii"), Just("unmask")], "[a-z]{0,6}")
        .prop_map(|(prefix, marker, suffix)| format!("{}:{}{}", prefix, marker, suffix))
}

fn arb_region() -> impl Strategy<Value = String> {
    "[a-z]{3,6}"
}

fn arb_region_state() -> impl Strategy<Value = RegionState> {
    prop_oneof![
        Just(RegionState::Prospect),
        Just(RegionState::Pilot),
        Just(RegionState::Active),
        Just(RegionState::Paused),
    ]
}

fn arb_role() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("expansion_manager".to_string()),
        Just("city_manager".to_string()),
        Just("pricing_analyst".to_string()),
    ]
}

fn arb_resource() -> impl Strategy<Value = Option<ResourceContext>> {
    (
        proptest::option::of(arb_region()),
        proptest::option::of(arb_region_state()),
    )
        .prop_map(|(region, state)| {
            if region.is_none() && state.is_none() {
                None
            } else {
                Some(ResourceContext {
                    region_id: region.map(Into::into),
                    region_state: state,
                })
            }
        })
}

fn user(role: &str, permissions: &[String], regions: &[String]) -> User {
    let mut user = User::new("u-prop", role, 50).with_permissions(permissions.iter().cloned());
    for region in regions {
        user = user.with_region(region.as_str());
    }
    user
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Without the permission, the denial is always at rbac.
    #[test]
    fn missing_permission_always_denies_at_rbac(
        role in arb_role(),
        action in arb_action(),
        permissions in prop::collection::vec(arb_action(), 0..5),
        regions in prop::collection::vec(arb_region(), 0..3),
        resource in arb_resource(),
    ) {
        prop_assume!(!permissions.contains(&action));
        let engine = PolicyEngine::new();
        let decision = engine.authorize(&user(&role, &permissions, &regions), &action, resource.as_ref());
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.step, Some(PolicyStep::Rbac));
    }

    /// With the permission but outside the allowed regions, the denial is regional.
    #[test]
    fn foreign_region_denies_at_regional(
        role in arb_role(),
        action in arb_action(),
        regions in prop::collection::vec(arb_region(), 0..3),
        target in arb_region(),
        state in proptest::option::of(arb_region_state()),
    ) {
        prop_assume!(!regions.contains(&target));
        let engine = PolicyEngine::new();
        let resource = ResourceContext { region_id: Some(target.into()), region_state: state };
        let decision = engine.authorize(
            &user(&role, &[action.clone()], &regions),
            &action,
            Some(&resource),
        );
        prop_assert_eq!(decision.step, Some(PolicyStep::Regional));
    }

    /// PII and unmask actions are denied at sensitivity even with the literal permission.
    #[test]
    fn sensitive_actions_deny_at_sensitivity(
        role in arb_role(),
        action in arb_sensitive_action(),
        region in arb_region(),
        state in proptest::option::of(arb_region_state()),
        with_resource in any::<bool>(),
    ) {
        let engine = PolicyEngine::new();
        let resource = ResourceContext { region_id: Some(region.clone().into()), region_state: state };
        let decision = engine.authorize(
            &user(&role, &[action.clone()], &[region]),
            &action,
            if with_resource { Some(&resource) } else { None },
        );
        prop_assert_eq!(decision.step, Some(PolicyStep::Sensitivity));
    }

    /// Expansion managers are denied at expansion_scope outside prospect/pilot
    /// and pass that step inside them.
    #[test]
    fn expansion_scope_follows_region_state(
        action in arb_standard_action(),
        region in arb_region(),
        state in arb_region_state(),
    ) {
        let engine = PolicyEngine::new();
        let resource = ResourceContext { region_id: Some(region.clone().into()), region_state: Some(state) };
        let decision = engine.authorize(
            &user("expansion_manager", &[action.clone()], &[region]),
            &action,
            Some(&resource),
        );
        if state.is_expansion_stage() {
            prop_assert!(decision.allowed);
        } else {
            prop_assert_eq!(decision.step, Some(PolicyStep::ExpansionScope));
        }
    }

    /// The same request always yields the same decision.
    #[test]
    fn authorize_is_deterministic(
        role in arb_role(),
        action in arb_action(),
        permissions in prop::collection::vec(arb_action(), 0..4),
        regions in prop::collection::vec(arb_region(), 0..3),
        resource in arb_resource(),
    ) {
        let engine = PolicyEngine::new();
        let u = user(&role, &permissions, &regions);
        let first = engine.authorize(&u, &action, resource.as_ref());
        let second = engine.authorize(&u, &action, resource.as_ref());
        prop_assert_eq!(first, second);
    }
}
