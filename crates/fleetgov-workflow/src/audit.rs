//! Append-only audit trail.
//!
//! Mutating workflow steps put their audit entries into the same write batch
//! as the change they describe. The trail stamps new entries, records
//! standalone events and serves read-only queries.

use fleetgov_store::{GovernanceStore, WriteBatch};
use fleetgov_types::{AuditAction, AuditLogEntry, AuditQuery, UserId};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn GovernanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start an entry stamped with the current time.
    pub fn entry(
        &self,
        entity_type: &str,
        entity_id: impl ToString,
        actor: &UserId,
        action: AuditAction,
    ) -> AuditLogEntry {
        AuditLogEntry::new(entity_type, entity_id, actor.clone(), action, self.clock.now())
    }

    /// Append one entry on its own.
    pub async fn record(&self, entry: AuditLogEntry) -> Result<()> {
        debug!(action = %entry.action, entity = %entry.entity_id, "Recording audit entry");
        let mut batch = WriteBatch::new();
        batch.audit(entry);
        self.store.commit(batch).await?;
        Ok(())
    }

    /// Entries matching the query, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        Ok(self.store.query_audit(query).await?)
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}
