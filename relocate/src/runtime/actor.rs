use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::MigrationConfig;
use crate::events::{MigrationEvent, MigrationEventPayload, MigrationEventPublisher};
use crate::migration::{FailureReason, MigrationPhase, MigrationRequest, PhaseEvent};
use crate::placement::TargetPlacement;
use crate::registry::{ActiveMigrations, MigrationClaim};
use crate::store::WorkloadStore;
use crate::target::{PlacementOutcome, TargetContextBuilder, TargetHandle, TargetRequest, TargetScheduler};
use crate::telemetry;
use crate::transfer::{LiveTransfer, TargetContext, TransferStatus};
use crate::workload::NodeName;

use super::handle::Control;
use super::supervisor::ShutdownToken;

/// Drives one admitted migration from `Pending` to a terminal phase.
///
/// Owns the request exclusively. Every applied transition is published on
/// the status channel and the event bus before the next step starts.
pub(crate) struct MigrationActor<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    pub(crate) request: MigrationRequest,
    pub(crate) placement: TargetPlacement,
    pub(crate) claim: MigrationClaim,
    pub(crate) config: MigrationConfig,
    pub(crate) store: Arc<W>,
    pub(crate) targets: Arc<TargetContextBuilder<S>>,
    pub(crate) transfer: Arc<T>,
    pub(crate) events: Arc<dyn MigrationEventPublisher>,
    pub(crate) registry: ActiveMigrations,
    pub(crate) shutdown: ShutdownToken,
    pub(crate) control: mpsc::Receiver<Control>,
    pub(crate) status: watch::Sender<MigrationRequest>,
    pub(crate) target: Option<TargetHandle>,
    /// Creation still in flight when the migration stopped waiting for it.
    pub(crate) abandoned: Option<JoinHandle<anyhow::Result<TargetHandle>>>,
}

impl<W, S, T> MigrationActor<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    pub(crate) async fn run(mut self) {
        let migration_id = self.request.id.to_string();
        let span = telemetry::migration_span(&migration_id, self.request.workload.to_string());

        async move {
            let timing = telemetry::record_migration_start(&migration_id);
            self.publish(MigrationEventPayload::Admitted {
                target_placement: self.placement.selector().clone(),
            })
            .await;

            let outcome = match AssertUnwindSafe(self.drive()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(self.collaborator_panicked(&*panic)),
            };
            self.stop_accepting_control();
            match outcome {
                Ok(node) => self.succeed(node).await,
                Err(reason) => self.fail(reason).await,
            }

            telemetry::record_migration_completed(timing, self.request.phase());
            telemetry::set_active_migrations(self.registry.len().await);

            if let Some(creation) = self.abandoned.take() {
                self.reclaim(creation).await;
            }
        }
        .instrument(span)
        .await;
    }

    async fn drive(&mut self) -> Result<NodeName, FailureReason> {
        self.advance(PhaseEvent::Admitted).await;

        let deadline = self.targets.scheduling_deadline();
        let handle = self.create_target(deadline).await?;
        let node = self.schedule(&handle, deadline).await?;
        self.advance(PhaseEvent::TargetPlaced { node: node.clone() })
            .await;

        let context = TargetContext {
            migration_id: self.request.id,
            workload: self.request.workload.clone(),
            handle,
            source_node: self.request.status.source_node.clone(),
            target_node: node.clone(),
            placement: self.placement.selector().clone(),
        };
        let transfer = Arc::clone(&self.transfer);
        let readiness_timeout = self.config.readiness_timeout();
        let transfer_timeout = self.config.transfer_timeout();
        let span = telemetry::transfer_span(self.request.id.to_string(), node.as_str());

        self.advance(PhaseEvent::PreparingTarget).await;
        self.bounded(
            MigrationPhase::PreparingTarget,
            readiness_timeout,
            transfer.prepare_target(&context).instrument(span.clone()),
        )
        .await?;
        self.advance(PhaseEvent::TargetReady).await;

        self.advance(PhaseEvent::TransferStarted).await;
        self.bounded(
            MigrationPhase::TransferInProgress,
            transfer_timeout,
            transfer.transfer(&context).instrument(span),
        )
        .await?;

        Ok(node)
    }

    /// Create the target context within the scheduling deadline.
    ///
    /// Creation runs as its own task. When cancellation, shutdown or the
    /// deadline wins the race the task is kept in `abandoned` and whatever
    /// it eventually creates is torn down by [`MigrationActor::reclaim`].
    async fn create_target(&mut self, deadline: Instant) -> Result<TargetHandle, FailureReason> {
        let request = TargetRequest {
            migration_id: self.request.id,
            workload: self.request.workload.clone(),
            source_node: self.request.status.source_node.clone(),
            placement: self.placement.selector().clone(),
        };
        let targets = Arc::clone(&self.targets);
        let mut creation =
            tokio::spawn(async move { targets.create(&request).await }.in_current_span());

        let created = match self
            .interruptible(tokio::time::timeout_at(deadline, &mut creation))
            .await
        {
            Ok(Ok(created)) => created,
            Ok(Err(_elapsed)) => {
                self.abandon(creation).await;
                return Err(self.scheduling_timed_out());
            }
            Err(reason) => {
                self.abandon(creation).await;
                return Err(reason);
            }
        };

        match created {
            Ok(Ok(handle)) => {
                self.adopt(handle.clone()).await;
                Ok(handle)
            }
            Ok(Err(err)) => Err(FailureReason::TargetLost {
                message: format!("target creation failed: {err}"),
            }),
            Err(err) => Err(FailureReason::TargetLost {
                message: format!("target creation task failed: {err}"),
            }),
        }
    }

    async fn adopt(&mut self, handle: TargetHandle) {
        self.target = Some(handle.clone());
        self.publish(MigrationEventPayload::TargetCreated { handle })
            .await;
    }

    /// Stop waiting for a creation. A creation that already finished is
    /// adopted so the failure path tears it down before reporting `Failed`.
    async fn abandon(&mut self, creation: JoinHandle<anyhow::Result<TargetHandle>>) {
        if !creation.is_finished() {
            self.abandoned = Some(creation);
            return;
        }
        if let Ok(Ok(handle)) = creation.await {
            self.adopt(handle).await;
        }
    }

    /// Wait, bounded by the shutdown grace, for an abandoned creation and
    /// tear down the target it produced.
    async fn reclaim(&self, mut creation: JoinHandle<anyhow::Result<TargetHandle>>) {
        let grace = self.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut creation).await {
            Ok(Ok(Ok(handle))) => {
                tracing::debug!(target = %handle, "tearing down target created after the migration stopped");
                self.teardown_target(handle).await;
            }
            Ok(Ok(Err(err))) => {
                tracing::debug!("abandoned target creation failed: {err}");
            }
            Ok(Err(err)) => {
                tracing::warn!("abandoned target creation task failed: {err}");
            }
            Err(_) => {
                creation.abort();
                tracing::warn!(
                    grace_ms = millis(grace),
                    "abandoned target creation did not finish; aborted"
                );
            }
        }
    }

    fn scheduling_timed_out(&self) -> FailureReason {
        FailureReason::Timeout {
            phase: MigrationPhase::Scheduling,
            waited_ms: millis(self.targets.scheduling_timeout()),
        }
    }

    async fn schedule(
        &mut self,
        handle: &TargetHandle,
        deadline: Instant,
    ) -> Result<NodeName, FailureReason> {
        let targets = Arc::clone(&self.targets);
        let span = telemetry::schedule_span(self.request.id.to_string(), handle.to_string());

        match self
            .interruptible(targets.await_placement(handle, deadline).instrument(span))
            .await?
        {
            PlacementOutcome::Placed { node } => Ok(node),
            PlacementOutcome::InfeasibleTimeout { waited } => Err(FailureReason::Timeout {
                phase: MigrationPhase::Scheduling,
                waited_ms: millis(waited),
            }),
            PlacementOutcome::Error { reason } => Err(FailureReason::TargetLost { message: reason }),
        }
    }

    async fn bounded<F>(
        &mut self,
        phase: MigrationPhase,
        limit: Duration,
        step: F,
    ) -> Result<(), FailureReason>
    where
        F: Future<Output = TransferStatus>,
    {
        match self.interruptible(tokio::time::timeout(limit, step)).await? {
            Ok(TransferStatus::Completed) => Ok(()),
            Ok(TransferStatus::Failed { error }) => {
                Err(FailureReason::TransferError { message: error })
            }
            Ok(TransferStatus::TargetLost { reason }) => {
                Err(FailureReason::TargetLost { message: reason })
            }
            Err(_) => Err(FailureReason::Timeout {
                phase,
                waited_ms: millis(limit),
            }),
        }
    }

    /// Run `step` unless a control signal or shutdown arrives first.
    async fn interruptible<F>(&mut self, step: F) -> Result<F::Output, FailureReason>
    where
        F: Future,
    {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            Some(control) = self.control.recv() => Err(control.into_failure()),
            _ = shutdown.cancelled() => Err(FailureReason::Cancelled {
                reason: "migration runtime shutting down".into(),
            }),
            output = step => Ok(output),
        }
    }

    /// Refuse further control signals and log any that arrived too late.
    fn stop_accepting_control(&mut self) {
        self.control.close();
        while let Ok(control) = self.control.try_recv() {
            tracing::info!(
                phase = %self.request.phase(),
                ?control,
                "control signal arrived after the last interruptible step; ignored"
            );
        }
    }

    /// Map a panic escaping a collaborator to the failure of the step it
    /// interrupted.
    fn collaborator_panicked(&self, panic: &(dyn Any + Send)) -> FailureReason {
        let message = panic_message(panic);
        tracing::error!(phase = %self.request.phase(), "migration step panicked: {message}");
        match self.request.phase() {
            MigrationPhase::PreparingTarget
            | MigrationPhase::TargetReady
            | MigrationPhase::TransferInProgress => FailureReason::TransferError {
                message: format!("transfer step panicked: {message}"),
            },
            _ => FailureReason::TargetLost {
                message: format!("scheduling step panicked: {message}"),
            },
        }
    }

    async fn succeed(&mut self, node: NodeName) {
        let write = AssertUnwindSafe(
            self.store
                .set_current_node(&self.request.workload, node.clone()),
        )
        .catch_unwind()
        .await;
        let error = match write {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(format!("store panicked: {}", panic_message(&*panic))),
        };
        if let Some(error) = error {
            tracing::error!(
                workload = %self.request.workload,
                node = %node,
                "failed to record new current node: {error}"
            );
        }
        // The target context now hosts the workload.
        self.target = None;

        self.finish(PhaseEvent::TransferCompleted).await;
        self.publish(MigrationEventPayload::Succeeded { node }).await;
    }

    async fn fail(&mut self, reason: FailureReason) {
        tracing::warn!(
            phase = %self.request.phase(),
            kind = reason.kind(),
            "migration failed: {reason}"
        );

        if let Some(handle) = self.target.take() {
            self.teardown_target(handle).await;
        }

        let event = match reason.clone() {
            FailureReason::Timeout {
                phase: MigrationPhase::Scheduling,
                waited_ms,
            } => PhaseEvent::SchedulingTimedOut { waited_ms },
            other => PhaseEvent::Fail(other),
        };
        self.finish(event).await;
        self.publish(MigrationEventPayload::Failed { reason }).await;
    }

    /// Free the workload's slot, then apply the terminal transition.
    ///
    /// A caller woken by the terminal status can resubmit immediately.
    async fn finish(&mut self, event: PhaseEvent) {
        self.registry.release(&self.claim).await;
        self.advance(event).await;
    }

    async fn advance(&mut self, event: PhaseEvent) {
        match self.request.apply(event) {
            Ok(transition) => {
                self.status.send_replace(self.request.clone());
                telemetry::record_phase_transition(
                    self.request.id.to_string(),
                    transition.from,
                    transition.to,
                );
                self.publish(MigrationEventPayload::PhaseChanged {
                    from: transition.from,
                    to: transition.to,
                })
                .await;
            }
            Err(err) => {
                tracing::error!(migration_id = %self.request.id, "transition rejected: {err}");
            }
        }
    }

    async fn teardown_target(&self, handle: TargetHandle) {
        match AssertUnwindSafe(self.targets.teardown(&handle))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                self.publish(MigrationEventPayload::TargetTornDown { handle })
                    .await;
            }
            Ok(Err(err)) => {
                tracing::error!(target = %handle, "target teardown failed: {err}");
            }
            Err(panic) => {
                tracing::error!(
                    target = %handle,
                    "target teardown panicked: {}",
                    panic_message(&*panic)
                );
            }
        }
    }

    async fn publish(&self, payload: MigrationEventPayload) {
        let event = MigrationEvent::new(self.request.id, self.request.workload.clone(), payload);
        if let Err(err) = self.events.publish(event).await {
            tracing::error!(migration_id = %self.request.id, "publish migration event failed: {err}");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
