//! Emergency brake.
//!
//! The brake position is a single row in the governance store, so every
//! process sharing the store sees the same brake. While it is engaged,
//! proposals are still created and approvals still recorded, but no change
//! reaches live effect: activations carry a `BrakeReleased` precondition
//! that the store checks inside the committing transaction. Brake writes are
//! last-write-wins.
//!
//! Subscribers are notified of positions this process writes or reads.

use fleetgov_store::{GovernanceStore, Write, WriteBatch};
use fleetgov_types::{AuditAction, BrakeState, UserId};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::error::Result;

pub struct EmergencyBrake {
    store: Arc<dyn GovernanceStore>,
    audit: AuditTrail,
    observed: watch::Sender<BrakeState>,
}

impl EmergencyBrake {
    pub fn new(store: Arc<dyn GovernanceStore>, audit: AuditTrail) -> Self {
        let (observed, _) = watch::channel(BrakeState::released());
        Self {
            store,
            audit,
            observed,
        }
    }

    /// Read the shared brake position.
    pub async fn status(&self) -> Result<BrakeState> {
        let state = self.store.get_brake().await?;
        self.observe(&state);
        Ok(state)
    }

    pub async fn is_active(&self) -> Result<bool> {
        Ok(self.status().await?.active)
    }

    /// Position last seen by this process, without a store read.
    pub fn last_observed(&self) -> BrakeState {
        self.observed.borrow().clone()
    }

    /// Watch brake changes.
    pub fn subscribe(&self) -> watch::Receiver<BrakeState> {
        self.observed.subscribe()
    }

    /// Engage the brake. Engaging an engaged brake replaces its reason.
    pub async fn engage(&self, actor: &UserId, reason: impl Into<String>) -> Result<BrakeState> {
        let reason = reason.into();
        let previous = self.status().await?;
        let entry = self.audit.entry("emergency_brake", "global", actor, AuditAction::BrakeEngaged);
        let next = BrakeState::engaged(reason.as_str(), actor.clone(), entry.created_at);

        let mut batch = WriteBatch::new();
        batch.push(Write::SetBrake(next.clone())).audit(
            entry
                .with_values(Some(json!(previous)), Some(json!(next)))
                .with_reason(reason.as_str()),
        );
        self.store.commit(batch).await?;
        self.observe(&next);

        warn!(actor = %actor, reason = %reason, "Emergency brake engaged");
        Ok(next)
    }

    /// Release the brake. Blocked proposals are not re-evaluated here.
    pub async fn release(&self, actor: &UserId) -> Result<BrakeState> {
        let previous = self.status().await?;
        if !previous.active {
            return Ok(previous);
        }

        let next = BrakeState::released();
        let mut batch = WriteBatch::new();
        batch.push(Write::SetBrake(next.clone())).audit(
            self.audit
                .entry("emergency_brake", "global", actor, AuditAction::BrakeReleased)
                .with_values(Some(json!(previous)), Some(json!(next))),
        );
        self.store.commit(batch).await?;
        self.observe(&next);

        info!(actor = %actor, "Emergency brake released");
        Ok(next)
    }

    fn observe(&self, state: &BrakeState) {
        self.observed.send_if_modified(|current| {
            if current == state {
                return false;
            }
            *current = state.clone();
            true
        });
    }
}

impl std::fmt::Debug for EmergencyBrake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyBrake")
            .field("last_observed", &*self.observed.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use fleetgov_store::InMemoryGovernanceStore;
    use fleetgov_types::AuditQuery;

    fn brake_over(store: Arc<InMemoryGovernanceStore>) -> (EmergencyBrake, AuditTrail) {
        let trail = AuditTrail::new(store.clone(), Arc::new(SystemClock));
        (EmergencyBrake::new(store, trail.clone()), trail)
    }

    fn brake() -> (EmergencyBrake, AuditTrail) {
        brake_over(Arc::new(InMemoryGovernanceStore::new()))
    }

    #[tokio::test]
    async fn engage_and_release_are_audited() {
        let (brake, trail) = brake();
        let ops = UserId::new("ops-lead");

        assert!(!brake.is_active().await.unwrap());
        let state = brake.engage(&ops, "pricing incident").await.unwrap();
        assert!(state.active);
        assert_eq!(
            brake.status().await.unwrap().reason.as_deref(),
            Some("pricing incident")
        );

        brake.release(&ops).await.unwrap();
        assert!(!brake.is_active().await.unwrap());

        let entries = trail.query(&AuditQuery::new()).await.unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert!(actions.contains(&AuditAction::BrakeEngaged));
        assert!(actions.contains(&AuditAction::BrakeReleased));
    }

    #[tokio::test]
    async fn releasing_a_released_brake_records_nothing() {
        let (brake, trail) = brake();
        brake.release(&UserId::new("ops")).await.unwrap();
        assert!(trail.query(&AuditQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let (brake, _) = brake();
        let mut rx = brake.subscribe();
        brake.engage(&UserId::new("ops"), "drill").await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().active);
    }

    #[tokio::test]
    async fn brakes_over_one_store_share_the_position() {
        let store = Arc::new(InMemoryGovernanceStore::new());
        let (first, _) = brake_over(store.clone());
        let (second, _) = brake_over(store);
        let mut rx = second.subscribe();

        first.engage(&UserId::new("ops"), "incident").await.unwrap();
        assert!(!second.last_observed().active);

        let seen = second.status().await.unwrap();
        assert!(seen.active);
        assert_eq!(seen.engaged_by, Some(UserId::new("ops")));
        rx.changed().await.unwrap();
        assert!(rx.borrow().active);

        second.release(&UserId::new("ops")).await.unwrap();
        assert!(!first.is_active().await.unwrap());
    }
}
