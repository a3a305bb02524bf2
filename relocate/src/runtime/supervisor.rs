use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::config::MigrationConfig;
use crate::error::SubmissionError;
use crate::events::MigrationEventPublisher;
use crate::migration::MigrationRequest;
use crate::placement::TargetPlacement;
use crate::registry::{ActiveMigrations, MigrationClaim};
use crate::store::WorkloadStore;
use crate::target::{TargetContextBuilder, TargetScheduler};
use crate::telemetry;
use crate::transfer::LiveTransfer;

use super::actor::MigrationActor;
use super::handle::MigrationHandle;

const CONTROL_CAPACITY: usize = 4;

/// Token for signaling shutdown to running migrations.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Mark the token cancelled and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        // Register before checking the flag so a concurrent cancel is not missed.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs admitted migrations, one task per migration.
pub struct MigrationRuntime<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    config: MigrationConfig,
    store: Arc<W>,
    targets: Arc<TargetContextBuilder<S>>,
    transfer: Arc<T>,
    events: Arc<dyn MigrationEventPublisher + 'static>,
    registry: ActiveMigrations,
    shutdown_token: ShutdownToken,
    actor_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<W, S, T> fmt::Debug for MigrationRuntime<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actor_count = self
            .actor_handles
            .try_lock()
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or_default();

        f.debug_struct("MigrationRuntime")
            .field("config", &self.config)
            .field("store_type", &type_name::<W>())
            .field("scheduler_type", &type_name::<S>())
            .field("transfer_type", &type_name::<T>())
            .field("registry", &self.registry)
            .field("running_actors", &actor_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<W, S, T> MigrationRuntime<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    /// Create a runtime with no migrations running.
    ///
    /// Prefer [`MigrationRuntimeBuilder`](super::MigrationRuntimeBuilder),
    /// which validates `config` first.
    pub fn new(
        config: MigrationConfig,
        store: Arc<W>,
        scheduler: Arc<S>,
        transfer: Arc<T>,
        events: Arc<dyn MigrationEventPublisher + 'static>,
    ) -> Self {
        let targets = Arc::new(TargetContextBuilder::new(
            scheduler,
            config.scheduling_timeout(),
            config.placement_poll_interval(),
        ));
        Self {
            config,
            store,
            targets,
            transfer,
            events,
            registry: ActiveMigrations::new(),
            shutdown_token: ShutdownToken::new(),
            actor_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<W> {
        Arc::clone(&self.store)
    }

    pub fn scheduler(&self) -> Arc<S> {
        self.targets.scheduler()
    }

    pub fn transfer(&self) -> Arc<T> {
        Arc::clone(&self.transfer)
    }

    /// Publisher every migration reports to.
    pub fn events(&self) -> Arc<dyn MigrationEventPublisher> {
        Arc::clone(&self.events)
    }

    /// Registry of workloads with a non-terminal migration.
    pub fn registry(&self) -> &ActiveMigrations {
        &self.registry
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// `true` once [`MigrationRuntime::shutdown`] has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Start driving an admitted migration.
    ///
    /// `claim` must be the registry claim for `request`; it is released when
    /// the migration reaches a terminal phase.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::ShuttingDown`] and releases `claim` if
    /// shutdown has begun. The check runs under the task list lock, so every
    /// spawned migration is joined by [`MigrationRuntime::shutdown`].
    pub async fn spawn_migration(
        &self,
        request: MigrationRequest,
        placement: TargetPlacement,
        claim: MigrationClaim,
    ) -> Result<MigrationHandle, SubmissionError> {
        let mut handles = self.actor_handles.lock().await;
        if self.shutdown_token.is_cancelled() {
            drop(handles);
            self.registry.release(&claim).await;
            return Err(SubmissionError::ShuttingDown);
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(request.clone());
        let handle = MigrationHandle::new(
            request.id,
            request.workload.clone(),
            control_tx,
            status_rx,
        );

        let actor = MigrationActor {
            request,
            placement,
            claim,
            config: self.config.clone(),
            store: self.store(),
            targets: Arc::clone(&self.targets),
            transfer: self.transfer(),
            events: self.events(),
            registry: self.registry.clone(),
            shutdown: self.shutdown_token.clone(),
            control: control_rx,
            status: status_tx,
            target: None,
            abandoned: None,
        };

        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(actor.run()));
        telemetry::set_active_migrations(handles.len());

        Ok(handle)
    }

    /// Cancel every in-flight migration and wait for each to wind down.
    ///
    /// Each migration tears down its target context before reporting
    /// `Failed`. Waiting on one migration is bounded by the configured
    /// shutdown grace period.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Initiating shutdown of migration runtime");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.actor_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(self.config.shutdown_grace(), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Migration task failed: {:?}", e),
                Err(_) => tracing::warn!("Migration task timed out during shutdown"),
            }
        }

        tracing::info!("Migration runtime shutdown complete");
        Ok(())
    }
}
