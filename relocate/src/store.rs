use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::migration::MigrationPhase;
use crate::workload::{NodeName, PlacementMap, Workload, WorkloadId};

/// Access to workloads as owned by their controller.
///
/// The migration subsystem reads one complete snapshot per submission and
/// writes only `status.current_node`, and only after a migration succeeds.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Read a consistent snapshot of a workload.
    async fn snapshot(&self, id: &WorkloadId) -> anyhow::Result<Option<Workload>>;

    /// Record the node now hosting the workload.
    async fn set_current_node(&self, id: &WorkloadId, node: NodeName) -> anyhow::Result<()>;
}

/// In-memory workload store.
#[derive(Clone, Default)]
pub struct InMemoryWorkloadStore {
    workloads: Arc<Mutex<HashMap<WorkloadId, Workload>>>,
}

impl std::fmt::Debug for InMemoryWorkloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InMemoryWorkloadStore");
        match self.workloads.try_lock() {
            Ok(workloads) => {
                debug.field("workloads", &workloads.len());
            }
            Err(_) => {
                debug.field("workloads", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryWorkloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workload.
    pub async fn insert(&self, workload: Workload) {
        let mut guard = self.workloads.lock().await;
        guard.insert(workload.id.clone(), workload);
    }

    /// Replace a workload's placement, as its owning controller would.
    pub async fn update_placement(
        &self,
        id: &WorkloadId,
        placement: PlacementMap,
    ) -> anyhow::Result<()> {
        let mut guard = self.workloads.lock().await;
        let workload = guard
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("workload {id} not found"))?;
        workload.spec.placement = placement;
        Ok(())
    }

    /// Copy of the stored workload.
    pub async fn get(&self, id: &WorkloadId) -> Option<Workload> {
        self.workloads.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl WorkloadStore for InMemoryWorkloadStore {
    async fn snapshot(&self, id: &WorkloadId) -> anyhow::Result<Option<Workload>> {
        Ok(self.get(id).await)
    }

    async fn set_current_node(&self, id: &WorkloadId, node: NodeName) -> anyhow::Result<()> {
        let mut guard = self.workloads.lock().await;
        let workload = guard
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("workload {id} not found"))?;
        workload.status.current_node = Some(node);
        Ok(())
    }
}

/// Count of known migrations per phase at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationSnapshot {
    pub sampled_at: DateTime<Utc>,
    pub phases: HashMap<String, usize>,
}

impl MigrationSnapshot {
    /// Empty snapshot taken at `sampled_at`.
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            phases: HashMap::new(),
        }
    }

    /// Count one migration in `phase`.
    pub fn record(&mut self, phase: MigrationPhase) {
        *self.phases.entry(phase.as_str().to_string()).or_default() += 1;
    }

    pub fn count(&self, phase: MigrationPhase) -> usize {
        self.phases.get(phase.as_str()).copied().unwrap_or(0)
    }

    /// Number of migrations not yet in a terminal phase.
    pub fn active(&self) -> usize {
        MigrationPhase::ALL
            .iter()
            .filter(|phase| !phase.is_terminal())
            .map(|phase| self.count(*phase))
            .sum()
    }
}
