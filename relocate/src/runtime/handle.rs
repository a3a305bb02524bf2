use tokio::sync::{mpsc, watch};

use crate::migration::{FailureReason, MigrationPhase, MigrationRequest};
use crate::workload::{MigrationId, WorkloadId};

/// Out-of-band signal delivered to a running migration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Control {
    Cancel { reason: String },
    TargetLost { reason: String },
}

impl Control {
    pub(crate) fn into_failure(self) -> FailureReason {
        match self {
            Control::Cancel { reason } => FailureReason::Cancelled { reason },
            Control::TargetLost { reason } => FailureReason::TargetLost { message: reason },
        }
    }
}

/// Handle to one admitted migration.
///
/// Cloning is cheap. Every clone observes the same status and can signal the
/// same migration.
#[derive(Clone, Debug)]
pub struct MigrationHandle {
    id: MigrationId,
    workload: WorkloadId,
    control: mpsc::Sender<Control>,
    status: watch::Receiver<MigrationRequest>,
}

impl MigrationHandle {
    pub(crate) fn new(
        id: MigrationId,
        workload: WorkloadId,
        control: mpsc::Sender<Control>,
        status: watch::Receiver<MigrationRequest>,
    ) -> Self {
        Self {
            id,
            workload,
            control,
            status,
        }
    }

    pub fn id(&self) -> MigrationId {
        self.id
    }

    pub fn workload(&self) -> &WorkloadId {
        &self.workload
    }

    /// Latest published state of the migration.
    pub fn current(&self) -> MigrationRequest {
        self.status.borrow().clone()
    }

    /// Phase of the latest published state.
    pub fn phase(&self) -> MigrationPhase {
        self.status.borrow().phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Ask the migration to stop.
    ///
    /// Returns `true` if the request was queued while the migration could
    /// still act on it, and `false` once it finished or passed its last
    /// interruptible step. A request queued in the instant the transfer
    /// completes is logged and ignored: the migration then ends `Succeeded`.
    /// [`wait_terminal`](Self::wait_terminal) reports the outcome that counts.
    ///
    /// The migration tears its target context down before reporting `Failed`.
    pub async fn cancel(&self, reason: impl Into<String>) -> bool {
        self.signal(Control::Cancel {
            reason: reason.into(),
        })
        .await
    }

    /// Report that the target context disappeared underneath the migration.
    ///
    /// Same delivery rules as [`cancel`](Self::cancel).
    pub async fn report_target_lost(&self, reason: impl Into<String>) -> bool {
        self.signal(Control::TargetLost {
            reason: reason.into(),
        })
        .await
    }

    async fn signal(&self, control: Control) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.control.send(control).await.is_ok()
    }

    /// Wait until the migration reaches `Succeeded` or `Failed`.
    pub async fn wait_terminal(&self) -> MigrationRequest {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(MigrationRequest::is_terminal)
            .await
            .map(|request| request.clone());
        match reached {
            Ok(request) => request,
            Err(_) => status.borrow().clone(),
        }
    }

    /// Wait until the migration has passed through `phase` or finished.
    ///
    /// Phases can follow each other faster than a watcher wakes up, so this
    /// checks the recorded transitions rather than the current phase only.
    pub async fn wait_for_phase(&self, phase: MigrationPhase) -> MigrationRequest {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|request| {
                request.phase() == phase
                    || request.is_terminal()
                    || request.status.transitions.iter().any(|t| t.to == phase)
            })
            .await
            .map(|request| request.clone());
        match reached {
            Ok(request) => request,
            Err(_) => status.borrow().clone(),
        }
    }

    /// Receiver for every status update of this migration.
    pub fn watch(&self) -> watch::Receiver<MigrationRequest> {
        self.status.clone()
    }
}
