use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::MigrationConfig;
use crate::events::{InProcEventBus, MigrationEventPublisher};
use crate::store::WorkloadStore;
use crate::target::TargetScheduler;
use crate::transfer::LiveTransfer;

use super::supervisor::MigrationRuntime;

/// Builder for a [`MigrationRuntime`] with explicit collaborators.
///
/// The store, scheduler and transfer are required. Without an explicit event
/// publisher the runtime gets an [`InProcEventBus`] sized from the config.
///
/// # Example
///
/// ```ignore
/// use relocate::*;
///
/// let runtime = MigrationRuntimeBuilder::new(MigrationConfig::default())
///     .with_store(store)
///     .with_scheduler(scheduler)
///     .with_transfer(transfer)
///     .build()?;
/// ```
pub struct MigrationRuntimeBuilder<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    config: MigrationConfig,
    store: Option<Arc<W>>,
    scheduler: Option<Arc<S>>,
    transfer: Option<Arc<T>>,
    events: Option<Arc<dyn MigrationEventPublisher + 'static>>,
}

impl<W, S, T> fmt::Debug for MigrationRuntimeBuilder<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MigrationRuntimeBuilder");
        debug.field("config", &self.config);
        debug.field("store_set", &self.store.is_some());
        debug.field("scheduler_set", &self.scheduler.is_some());
        debug.field("transfer_set", &self.transfer.is_some());
        debug.field("events_set", &self.events.is_some());

        if self.scheduler.is_some() {
            debug.field("scheduler_type", &type_name::<S>());
        }
        if self.transfer.is_some() {
            debug.field("transfer_type", &type_name::<T>());
        }

        debug.finish()
    }
}

impl<W, S, T> MigrationRuntimeBuilder<W, S, T>
where
    W: WorkloadStore + 'static,
    S: TargetScheduler + 'static,
    T: LiveTransfer + 'static,
{
    /// Start a builder; every collaborator except events is required.
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            store: None,
            scheduler: None,
            transfer: None,
            events: None,
        }
    }

    /// Workload store read at admission and written on success.
    pub fn with_store(mut self, store: Arc<W>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scheduler that creates and binds target contexts.
    pub fn with_scheduler(mut self, scheduler: Arc<S>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Collaborator that prepares the target and moves state.
    pub fn with_transfer(mut self, transfer: Arc<T>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Publisher for lifecycle events.
    ///
    /// Defaults to an [`InProcEventBus`](crate::events::InProcEventBus) sized
    /// by `event_capacity`.
    pub fn with_events(mut self, events: Arc<dyn MigrationEventPublisher + 'static>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a required collaborator
    /// is missing.
    pub fn build(self) -> anyhow::Result<MigrationRuntime<W, S, T>> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let scheduler = self
            .scheduler
            .ok_or_else(|| anyhow::anyhow!("scheduler dependency missing"))?;
        let transfer = self
            .transfer
            .ok_or_else(|| anyhow::anyhow!("transfer dependency missing"))?;
        let events = self.events.unwrap_or_else(|| {
            Arc::new(InProcEventBus::new(self.config.event_capacity))
                as Arc<dyn MigrationEventPublisher>
        });

        Ok(MigrationRuntime::new(
            self.config,
            store,
            scheduler,
            transfer,
            events,
        ))
    }
}
