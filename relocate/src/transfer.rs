use async_trait::async_trait;

use crate::target::TargetHandle;
use crate::workload::{MigrationId, NodeName, PlacementMap, WorkloadId};

/// A placed target context handed to the transfer collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetContext {
    pub migration_id: MigrationId,
    pub workload: WorkloadId,
    pub handle: TargetHandle,
    pub source_node: Option<NodeName>,
    pub target_node: NodeName,
    pub placement: PlacementMap,
}

/// Result reported by the transfer collaborator for one step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferStatus {
    /// The step finished.
    Completed,
    /// The step failed. Never retried by the runtime.
    Failed { error: String },
    /// The target context went away during the step.
    TargetLost { reason: String },
}

/// External live state-transfer mechanism.
///
/// The runtime calls [`prepare_target`](LiveTransfer::prepare_target) once the
/// target is placed and [`transfer`](LiveTransfer::transfer) once it is ready.
/// Each call is bounded by the runtime's configured timeouts and may be
/// abandoned when the migration is cancelled.
#[async_trait]
pub trait LiveTransfer: Send + Sync {
    /// Bring the target context to a state where it can receive the workload.
    async fn prepare_target(&self, target: &TargetContext) -> TransferStatus;

    /// Move the running workload's state to the target context.
    async fn transfer(&self, target: &TargetContext) -> TransferStatus;
}
