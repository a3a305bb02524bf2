//! Submission entry point for migrations.
//!
//! The gateway validates options, reads one snapshot of the workload,
//! resolves the target placement and admits at most one non-terminal
//! migration per workload. Every rejection happens before anything is
//! created. A dry run performs the same checks and returns what would be
//! submitted without touching any state.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::Instrument;

use crate::config::SubmitOptions;
use crate::error::SubmissionError;
use crate::events::MigrationEvent;
use crate::migration::{MigrationRequest, MigrationSpec};
use crate::placement::{parse_added_placement, TargetPlacement};
use crate::runtime::{MigrationHandle, MigrationRuntime};
use crate::store::{MigrationSnapshot, WorkloadStore};
use crate::target::TargetScheduler;
use crate::telemetry;
use crate::transfer::LiveTransfer;
use crate::workload::{MigrationId, NodeName, PlacementMap, WorkloadId};

/// Outcome of an accepted submission.
#[derive(Debug)]
pub enum Submission {
    Accepted(SubmissionReceipt),
    /// Nothing was created or transitioned.
    DryRun(DryRunReport),
}

impl Submission {
    /// Receipt of an accepted submission; `None` for a dry run.
    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        match self {
            Self::Accepted(receipt) => Some(receipt),
            Self::DryRun(_) => None,
        }
    }

    /// Consume into the receipt of an accepted submission.
    pub fn into_receipt(self) -> Option<SubmissionReceipt> {
        match self {
            Self::Accepted(receipt) => Some(receipt),
            Self::DryRun(_) => None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }
}

/// Acknowledgement of an admitted migration.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub handle: MigrationHandle,
    /// The request as admitted, still in `Pending`.
    pub request: MigrationRequest,
    pub target_placement: TargetPlacement,
}

impl SubmissionReceipt {
    /// Id of the admitted migration.
    pub fn migration_id(&self) -> MigrationId {
        self.request.id
    }
}

impl Display for SubmissionReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VM {} was scheduled to migrate", self.request.workload.name)
    }
}

/// What a submission would have done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunReport {
    pub workload: WorkloadId,
    pub source_node: Option<NodeName>,
    pub added_placement: PlacementMap,
    pub target_placement: PlacementMap,
    /// Addition keys discarded because the workload already constrains them.
    pub dropped_keys: Vec<String>,
}

impl Display for DryRunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VM {} would be scheduled to migrate (dry run)",
            self.workload.name
        )
    }
}

/// Admits migrations and tracks their handles.
pub struct MigrationGateway<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    runtime: Arc<MigrationRuntime<W, S, T>>,
    migrations: Mutex<HashMap<MigrationId, MigrationHandle>>,
}

impl<W, S, T> std::fmt::Debug for MigrationGateway<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("MigrationGateway");
        debug.field("runtime", &self.runtime);
        match self.migrations.try_lock() {
            Ok(migrations) => {
                debug.field("tracked", &migrations.len());
            }
            Err(_) => {
                debug.field("tracked", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl<W, S, T> MigrationGateway<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    /// Wrap a runtime. The gateway starts with no tracked migrations.
    pub fn new(runtime: Arc<MigrationRuntime<W, S, T>>) -> Self {
        Self {
            runtime,
            migrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> Arc<MigrationRuntime<W, S, T>> {
        Arc::clone(&self.runtime)
    }

    /// Submit a migration for `workload`.
    ///
    /// Returns as soon as the migration is admitted; progress is observed
    /// through the returned handle, [`status`](Self::status) or the event
    /// stream.
    pub async fn submit(
        &self,
        workload: &WorkloadId,
        options: SubmitOptions,
    ) -> Result<Submission, SubmissionError> {
        let span = telemetry::submit_span(workload.to_string(), options.dry_run());
        let result = self.admit(workload, &options).instrument(span).await;
        match &result {
            Ok(Submission::Accepted(receipt)) => {
                telemetry::record_submitted(workload.to_string());
                tracing::info!(migration_id = %receipt.migration_id(), "{receipt}");
            }
            Ok(Submission::DryRun(report)) => {
                tracing::info!(target_placement = ?report.target_placement, "{report}");
            }
            Err(err) => telemetry::record_rejected(workload.to_string(), err.code()),
        }
        result
    }

    async fn admit(
        &self,
        workload: &WorkloadId,
        options: &SubmitOptions,
    ) -> Result<Submission, SubmissionError> {
        let added = parse_added_placement(options.added_placement())?;

        let snapshot = self
            .runtime
            .store()
            .snapshot(workload)
            .await?
            .ok_or_else(|| SubmissionError::WorkloadNotFound(workload.clone()))?;
        let placement = TargetPlacement::resolve(&snapshot.spec.placement, &added);

        if options.dry_run() {
            if let Some(active) = self.runtime.registry().active_for(workload).await {
                return Err(SubmissionError::Conflict {
                    workload: workload.clone(),
                    active,
                });
            }
            return Ok(Submission::DryRun(DryRunReport {
                workload: workload.clone(),
                source_node: snapshot.status.current_node.clone(),
                added_placement: added,
                target_placement: placement.selector().clone(),
                dropped_keys: placement.dropped().to_vec(),
            }));
        }

        if self.runtime.is_shutting_down() {
            return Err(SubmissionError::ShuttingDown);
        }

        let mut request = MigrationRequest::new(
            workload.clone(),
            MigrationSpec {
                added_placement: added,
                dry_run: false,
            },
            snapshot.status.current_node.clone(),
        );
        request.set_target_placement(placement.selector().clone());

        let claim = self
            .runtime
            .registry()
            .try_claim(workload, request.id)
            .await
            .map_err(|active| SubmissionError::Conflict {
                workload: workload.clone(),
                active,
            })?;

        let handle = self
            .runtime
            .spawn_migration(request.clone(), placement.clone(), claim)
            .await?;
        self.track(handle.clone()).await;

        Ok(Submission::Accepted(SubmissionReceipt {
            handle,
            request,
            target_placement: placement,
        }))
    }

    /// Remember a new migration, forgetting finished ones once the
    /// configured tracking limit is reached.
    async fn track(&self, handle: MigrationHandle) {
        let mut migrations = self.migrations.lock().await;
        if migrations.len() >= self.runtime.config().tracked_migrations_limit {
            let before = migrations.len();
            migrations.retain(|_, handle| !handle.is_terminal());
            tracing::debug!(pruned = before - migrations.len(), "tracking limit reached");
        }
        migrations.insert(handle.id(), handle);
    }

    /// Latest state of a migration known to this gateway.
    ///
    /// Finished migrations stay visible until [`prune_terminal`](Self::prune_terminal)
    /// runs or the tracking limit is reached on a later submission.
    pub async fn status(&self, id: MigrationId) -> Option<MigrationRequest> {
        self.migrations.lock().await.get(&id).map(MigrationHandle::current)
    }

    /// Handle of a tracked migration, for waiting or signalling.
    pub async fn handle(&self, id: MigrationId) -> Option<MigrationHandle> {
        self.migrations.lock().await.get(&id).cloned()
    }

    /// Cancel a migration. Cancelling a finished migration is a no-op.
    pub async fn cancel(&self, id: MigrationId, reason: impl Into<String>) -> anyhow::Result<bool> {
        let handle = self
            .handle(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("migration {id} not found"))?;
        Ok(handle.cancel(reason).await)
    }

    /// Count known migrations per phase.
    pub async fn snapshot(&self) -> MigrationSnapshot {
        let migrations = self.migrations.lock().await;
        let mut snapshot = MigrationSnapshot::new(Utc::now());
        for handle in migrations.values() {
            snapshot.record(handle.phase());
        }
        snapshot
    }

    /// Forget migrations that reached a terminal phase. Returns how many.
    pub async fn prune_terminal(&self) -> usize {
        let mut migrations = self.migrations.lock().await;
        let before = migrations.len();
        migrations.retain(|_, handle| !handle.is_terminal());
        before - migrations.len()
    }

    /// Subscribe to lifecycle events of every migration.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.runtime.events().subscribe()
    }

    /// Reject new submissions and cancel every in-flight migration.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.runtime.shutdown().await
    }
}
