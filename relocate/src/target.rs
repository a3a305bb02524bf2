//! Boundary toward the cluster scheduler.
//!
//! The [`TargetContextBuilder`] asks a [`TargetScheduler`] to create the
//! ephemeral target context of a migration, constrained to nodes that carry
//! every pair of the target placement, then waits (bounded) for the scheduler
//! to bind it. It never sees or touches the workload's own placement map.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::workload::{MigrationId, NodeName, PlacementMap, WorkloadId};

/// What the scheduler is asked to create.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub migration_id: MigrationId,
    pub workload: WorkloadId,
    /// Node the workload runs on now; the target must land elsewhere.
    pub source_node: Option<NodeName>,
    /// Merged placement the target node must satisfy.
    pub placement: PlacementMap,
}

/// Handle of a created target context.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TargetHandle {
    pub id: Uuid,
    pub migration_id: MigrationId,
}

impl TargetHandle {
    /// Fresh handle for a context created on behalf of `migration_id`.
    pub fn new(migration_id: MigrationId) -> Self {
        Self {
            id: Uuid::now_v7(),
            migration_id,
        }
    }
}

impl Display for TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target-{}", self.id)
    }
}

/// Binding state of a target context as reported by the scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetBinding {
    /// No eligible node yet. Not a failure: labels can change.
    Pending,
    Placed(NodeName),
    /// The context was removed or evicted before it was bound.
    Lost { reason: String },
}

/// External cluster scheduler.
#[async_trait]
pub trait TargetScheduler: Send + Sync {
    /// Create a target context constrained to `request.placement`.
    async fn create_target(&self, request: &TargetRequest) -> anyhow::Result<TargetHandle>;

    /// Current binding of a created target context.
    async fn binding(&self, handle: &TargetHandle) -> anyhow::Result<TargetBinding>;

    /// Remove a target context. Must be idempotent.
    async fn teardown(&self, handle: &TargetHandle) -> anyhow::Result<()>;
}

/// Result of waiting for a target context to be placed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlacementOutcome {
    Placed { node: NodeName },
    /// No eligible node within the scheduling bound.
    InfeasibleTimeout { waited: Duration },
    Error { reason: String },
}

/// Creates target contexts through the scheduler and tracks their placement.
pub struct TargetContextBuilder<S: TargetScheduler + ?Sized> {
    scheduler: Arc<S>,
    scheduling_timeout: Duration,
    poll_interval: Duration,
}

impl<S: TargetScheduler + ?Sized> std::fmt::Debug for TargetContextBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetContextBuilder")
            .field("scheduler_type", &std::any::type_name::<S>())
            .field("scheduling_timeout", &self.scheduling_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<S: TargetScheduler + ?Sized> TargetContextBuilder<S> {
    /// Create a builder over `scheduler`.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Cluster scheduler that owns target contexts.
    /// * `scheduling_timeout` - Budget for creating a context and waiting for
    ///   its binding.
    /// * `poll_interval` - Pause between binding checks.
    pub fn new(scheduler: Arc<S>, scheduling_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            scheduling_timeout,
            poll_interval,
        }
    }

    /// Shared handle to the underlying scheduler.
    pub fn scheduler(&self) -> Arc<S> {
        Arc::clone(&self.scheduler)
    }

    /// Budget for the whole `Scheduling` phase, creation included.
    pub fn scheduling_timeout(&self) -> Duration {
        self.scheduling_timeout
    }

    /// Deadline of a `Scheduling` phase that starts now.
    ///
    /// Creating the target context and waiting for its binding share this
    /// one deadline.
    pub fn scheduling_deadline(&self) -> Instant {
        Instant::now() + self.scheduling_timeout
    }

    /// Ask the scheduler for a target context constrained to the placement.
    ///
    /// Not bounded here. Callers race it against
    /// [`TargetContextBuilder::scheduling_deadline`] and must tear down a
    /// handle that arrives after they stopped waiting.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error if the context could not be created.
    pub async fn create(&self, request: &TargetRequest) -> anyhow::Result<TargetHandle> {
        let handle = self.scheduler.create_target(request).await?;
        tracing::debug!(
            migration_id = %request.migration_id,
            target = %handle,
            placement = ?request.placement,
            "target context requested"
        );
        Ok(handle)
    }

    /// Wait until the target is bound, lost, or `deadline` passes.
    ///
    /// Transient scheduler errors are retried until the deadline. A timeout
    /// reports the full scheduling budget as the waited time.
    pub async fn await_placement(&self, handle: &TargetHandle, deadline: Instant) -> PlacementOutcome {
        match tokio::time::timeout_at(deadline, self.poll_binding(handle)).await {
            Ok(outcome) => outcome,
            Err(_) => PlacementOutcome::InfeasibleTimeout {
                waited: self.scheduling_timeout,
            },
        }
    }

    async fn poll_binding(&self, handle: &TargetHandle) -> PlacementOutcome {
        loop {
            match self.scheduler.binding(handle).await {
                Ok(TargetBinding::Placed(node)) => return PlacementOutcome::Placed { node },
                Ok(TargetBinding::Lost { reason }) => return PlacementOutcome::Error { reason },
                Ok(TargetBinding::Pending) => {}
                Err(err) => {
                    tracing::warn!(target = %handle, "target binding check failed: {err}");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Remove a target context.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error; the context may still exist.
    pub async fn teardown(&self, handle: &TargetHandle) -> anyhow::Result<()> {
        self.scheduler.teardown(handle).await?;
        tracing::debug!(target = %handle, "target context torn down");
        Ok(())
    }
}
