use async_trait::async_trait;
use parking_lot::Mutex;
use relocate::{LiveTransfer, MigrationId, NodeName, TargetContext, TransferStatus};
use std::sync::Arc;
use std::time::Duration;

/// Scripted behavior of one transfer step.
#[derive(Clone, Debug)]
pub enum StepBehavior {
    Complete,
    CompleteAfter(Duration),
    Fail(String),
    LoseTarget(String),
    /// Never returns; only a timeout or cancellation ends the step.
    Hang,
    /// Panics inside the collaborator.
    Panic(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStep {
    Prepare,
    Transfer,
}

#[derive(Clone, Debug)]
pub struct TransferCall {
    pub step: TransferStep,
    pub migration_id: MigrationId,
    pub target_node: NodeName,
}

/// Recording [`LiveTransfer`] with per-step scripted behavior.
#[derive(Clone)]
pub struct MockTransfer {
    calls: Arc<Mutex<Vec<TransferCall>>>,
    prepare: Arc<Mutex<StepBehavior>>,
    transfer: Arc<Mutex<StepBehavior>>,
}

impl std::fmt::Debug for MockTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransfer")
            .field("calls", &self.calls.lock().len())
            .field("prepare", &*self.prepare.lock())
            .field("transfer", &*self.transfer.lock())
            .finish()
    }
}

impl MockTransfer {
    /// Both steps complete immediately.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            prepare: Arc::new(Mutex::new(StepBehavior::Complete)),
            transfer: Arc::new(Mutex::new(StepBehavior::Complete)),
        }
    }

    pub fn set_prepare(&self, behavior: StepBehavior) {
        *self.prepare.lock() = behavior;
    }

    pub fn set_transfer(&self, behavior: StepBehavior) {
        *self.transfer.lock() = behavior;
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().clone()
    }

    /// Number of `transfer` calls, excluding preparation.
    pub fn transfers_started(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.step == TransferStep::Transfer)
            .count()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.calls.lock().len();
        assert_eq!(
            actual, expected,
            "Expected {expected} transfer calls, got {actual}"
        );
    }

    async fn run(&self, step: TransferStep, target: &TargetContext) -> TransferStatus {
        self.calls.lock().push(TransferCall {
            step,
            migration_id: target.migration_id,
            target_node: target.target_node.clone(),
        });

        let behavior = match step {
            TransferStep::Prepare => self.prepare.lock().clone(),
            TransferStep::Transfer => self.transfer.lock().clone(),
        };
        match behavior {
            StepBehavior::Complete => TransferStatus::Completed,
            StepBehavior::CompleteAfter(delay) => {
                tokio::time::sleep(delay).await;
                TransferStatus::Completed
            }
            StepBehavior::Fail(error) => TransferStatus::Failed { error },
            StepBehavior::LoseTarget(reason) => TransferStatus::TargetLost { reason },
            StepBehavior::Hang => std::future::pending().await,
            StepBehavior::Panic(message) => panic!("{message}"),
        }
    }
}

impl Default for MockTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveTransfer for MockTransfer {
    async fn prepare_target(&self, target: &TargetContext) -> TransferStatus {
        self.run(TransferStep::Prepare, target).await
    }

    async fn transfer(&self, target: &TargetContext) -> TransferStatus {
        self.run(TransferStep::Transfer, target).await
    }
}
