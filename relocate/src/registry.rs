use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::workload::{MigrationId, WorkloadId};

/// Proof that a migration holds the single active slot of its workload.
///
/// Returned by [`ActiveMigrations::try_claim`] and handed back through
/// [`ActiveMigrations::release`] once the migration reaches a terminal phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationClaim {
    pub workload: WorkloadId,
    pub migration_id: MigrationId,
    pub claimed_at: DateTime<Utc>,
}

/// Tracks which workloads have a non-terminal migration.
///
/// Check-then-insert happens under one lock, so two concurrent submissions
/// for the same workload can never both be admitted.
#[derive(Clone, Default)]
pub struct ActiveMigrations {
    inner: Arc<Mutex<HashMap<WorkloadId, MigrationId>>>,
}

impl std::fmt::Debug for ActiveMigrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("ActiveMigrations");
        match self.inner.try_lock() {
            Ok(active) => {
                debug.field("active", &active.len());
            }
            Err(_) => {
                debug.field("active", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl ActiveMigrations {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the workload's slot for `migration_id`.
    ///
    /// Returns the id of the migration already holding the slot on conflict.
    pub async fn try_claim(
        &self,
        workload: &WorkloadId,
        migration_id: MigrationId,
    ) -> Result<MigrationClaim, MigrationId> {
        let mut guard = self.inner.lock().await;
        if let Some(active) = guard.get(workload) {
            return Err(*active);
        }
        guard.insert(workload.clone(), migration_id);
        Ok(MigrationClaim {
            workload: workload.clone(),
            migration_id,
            claimed_at: Utc::now(),
        })
    }

    /// Release a claim. Only the holder can free the slot.
    pub async fn release(&self, claim: &MigrationClaim) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.get(&claim.workload) {
            Some(active) if *active == claim.migration_id => {
                guard.remove(&claim.workload);
                true
            }
            _ => false,
        }
    }

    /// The active migration of a workload, if any.
    pub async fn active_for(&self, workload: &WorkloadId) -> Option<MigrationId> {
        let guard = self.inner.lock().await;
        guard.get(workload).copied()
    }

    /// Number of workloads with an active migration.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
