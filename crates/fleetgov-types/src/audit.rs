//! Audit log entries and queries.
//!
//! The audit log is append-only: entries are created once and never modified
//! or deleted. Queries return entries newest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::{AuditEntryId, RegionId, ServiceKey, UserId};

/// Governance action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "role.created")]
    RoleCreated,
    #[serde(rename = "profile.created")]
    ProfileCreated,
    #[serde(rename = "profile.superseded")]
    ProfileSuperseded,
    #[serde(rename = "proposal.created")]
    ProposalCreated,
    #[serde(rename = "proposal.approved")]
    ProposalApproved,
    #[serde(rename = "proposal.rejected")]
    ProposalRejected,
    #[serde(rename = "proposal.cancelled")]
    ProposalCancelled,
    #[serde(rename = "proposal.superseded")]
    ProposalSuperseded,
    #[serde(rename = "proposal.emergency_blocked")]
    ProposalBlocked,
    #[serde(rename = "change.activated")]
    ChangeActivated,
    #[serde(rename = "schedule.created")]
    ScheduleCreated,
    #[serde(rename = "schedule.approved")]
    ScheduleApproved,
    #[serde(rename = "schedule.activated")]
    ScheduleActivated,
    #[serde(rename = "schedule.expired")]
    ScheduleExpired,
    #[serde(rename = "emergency_brake.engaged")]
    BrakeEngaged,
    #[serde(rename = "emergency_brake.released")]
    BrakeReleased,
}

impl AuditAction {
    pub const ALL: [AuditAction; 16] = [
        Self::RoleCreated,
        Self::ProfileCreated,
        Self::ProfileSuperseded,
        Self::ProposalCreated,
        Self::ProposalApproved,
        Self::ProposalRejected,
        Self::ProposalCancelled,
        Self::ProposalSuperseded,
        Self::ProposalBlocked,
        Self::ChangeActivated,
        Self::ScheduleCreated,
        Self::ScheduleApproved,
        Self::ScheduleActivated,
        Self::ScheduleExpired,
        Self::BrakeEngaged,
        Self::BrakeReleased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleCreated => "role.created",
            Self::ProfileCreated => "profile.created",
            Self::ProfileSuperseded => "profile.superseded",
            Self::ProposalCreated => "proposal.created",
            Self::ProposalApproved => "proposal.approved",
            Self::ProposalRejected => "proposal.rejected",
            Self::ProposalCancelled => "proposal.cancelled",
            Self::ProposalSuperseded => "proposal.superseded",
            Self::ProposalBlocked => "proposal.emergency_blocked",
            Self::ChangeActivated => "change.activated",
            Self::ScheduleCreated => "schedule.created",
            Self::ScheduleApproved => "schedule.approved",
            Self::ScheduleActivated => "schedule.activated",
            Self::ScheduleExpired => "schedule.expired",
            Self::BrakeEngaged => "emergency_brake.engaged",
            Self::BrakeReleased => "emergency_brake.released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one governance action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: UserId,
    pub action: AuditAction,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub region_id: Option<RegionId>,
    #[serde(default)]
    pub service_key: Option<ServiceKey>,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        actor: UserId,
        action: AuditAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::generate(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            actor,
            action,
            old_value: None,
            new_value: None,
            region_id: None,
            service_key: None,
            reason: None,
            created_at: now,
        }
    }

    pub fn with_values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn with_scope(mut self, region: Option<RegionId>, service: Option<ServiceKey>) -> Self {
        self.region_id = region;
        self.service_key = service;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Filter for reading the audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub region_id: Option<RegionId>,
    pub service_key: Option<ServiceKey>,
    pub action: Option<AuditAction>,
    pub actor: Option<UserId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: impl Into<RegionId>) -> Self {
        self.region_id = Some(region.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<ServiceKey>) -> Self {
        self.service_key = Some(service.into());
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<UserId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an entry matches this query.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(ref region) = self.region_id {
            if entry.region_id.as_ref() != Some(region) {
                return false;
            }
        }
        if let Some(ref service) = self.service_key {
            if entry.service_key.as_ref() != Some(service) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(ref actor) = self.actor {
            if entry.actor != *actor {
                return false;
            }
        }
        if let Some(ref entity_type) = self.entity_type {
            if entry.entity_type != *entity_type {
                return false;
            }
        }
        if let Some(ref entity_id) = self.entity_id {
            if entry.entity_id != *entity_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.created_at > to {
                return false;
            }
        }
        true
    }

    /// Select matching entries from a log held in append order.
    ///
    /// Newest first; entries with equal timestamps keep reverse append order.
    pub fn select<'a, I>(&self, entries: I) -> Vec<AuditLogEntry>
    where
        I: IntoIterator<Item = &'a AuditLogEntry>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut selected: Vec<AuditLogEntry> = entries
            .into_iter()
            .rev()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(action: AuditAction, actor: &str, at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry::new("role", "role:1", UserId::new(actor), action, at)
    }

    #[test]
    fn action_names_round_trip() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
            assert_eq!(
                serde_json::to_value(action).unwrap(),
                json!(action.as_str())
            );
        }
    }

    #[test]
    fn select_is_newest_first_with_stable_ties() {
        let t0 = Utc::now();
        let log = vec![
            entry(AuditAction::ProposalCreated, "a", t0),
            entry(AuditAction::ProposalApproved, "b", t0 + Duration::seconds(1)),
            entry(AuditAction::ChangeActivated, "b", t0 + Duration::seconds(1)),
            entry(AuditAction::ProposalApproved, "c", t0 + Duration::seconds(2)),
        ];

        let all = AuditQuery::new().select(&log);
        let actions: Vec<_> = all.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::ProposalApproved,
                AuditAction::ChangeActivated,
                AuditAction::ProposalApproved,
                AuditAction::ProposalCreated,
            ]
        );

        let by_b = AuditQuery::new().with_actor("b").with_limit(1).select(&log);
        assert_eq!(by_b.len(), 1);
        assert_eq!(by_b[0].action, AuditAction::ChangeActivated);
    }

    #[test]
    fn filters_on_scope_and_time() {
        let t0 = Utc::now();
        let scoped = entry(AuditAction::ScheduleActivated, "ops", t0).with_scope(
            Some(RegionId::new("nyc")),
            Some(ServiceKey::new("economy")),
        );
        let query = AuditQuery::new().with_region("nyc").with_service("economy");
        assert!(query.matches(&scoped));
        assert!(!query.matches(&entry(AuditAction::ScheduleActivated, "ops", t0)));

        let window = AuditQuery::new().with_time_range(t0 + Duration::seconds(1), t0 + Duration::seconds(5));
        assert!(!window.matches(&scoped));
    }
}
