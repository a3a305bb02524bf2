use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::migration::{FailureReason, MigrationPhase};
use crate::target::TargetHandle;
use crate::workload::{MigrationId, NodeName, PlacementMap, WorkloadId};

/// Metadata envelope attached to every migration event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    /// Shared by every event of one migration attempt.
    pub correlation_id: Uuid,
    pub idempotency_key: String,
    pub workload: WorkloadId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(
        migration_id: MigrationId,
        workload: WorkloadId,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            version: 1,
            correlation_id: migration_id.as_uuid(),
            idempotency_key: idempotency_key.into(),
            workload,
            timestamp: Utc::now(),
        }
    }
}

/// A migration lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub meta: EventMeta,
    pub migration_id: MigrationId,
    pub payload: MigrationEventPayload,
}

impl MigrationEvent {
    pub fn new(
        migration_id: MigrationId,
        workload: WorkloadId,
        payload: MigrationEventPayload,
    ) -> Self {
        let key = format!("{}-{}", payload.name(), migration_id);
        Self {
            meta: EventMeta::new(migration_id, workload, key),
            migration_id,
            payload,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MigrationEventPayload {
    /// The submission was admitted with this target placement.
    Admitted { target_placement: PlacementMap },
    /// The state machine moved between phases.
    PhaseChanged {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    /// A target context was requested from the scheduler.
    TargetCreated { handle: TargetHandle },
    /// A target context was removed after a failed attempt.
    TargetTornDown { handle: TargetHandle },
    /// The workload now runs on `node`.
    Succeeded { node: NodeName },
    Failed { reason: FailureReason },
}

impl MigrationEventPayload {
    /// Stable event name, used in idempotency keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::PhaseChanged { to, .. } => to.as_str(),
            Self::TargetCreated { .. } => "target-created",
            Self::TargetTornDown { .. } => "target-torn-down",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Publishes migration events to observers.
#[async_trait]
pub trait MigrationEventPublisher: Send + Sync {
    /// Publish an event to all subscribers.
    async fn publish(&self, event: MigrationEvent) -> anyhow::Result<()>;

    /// Subscribe to events published from now on.
    fn subscribe(&self) -> broadcast::Receiver<MigrationEvent>;
}

/// In-process event bus on a tokio broadcast channel.
///
/// Publishing never waits on subscribers. A subscriber that falls more than
/// `capacity` events behind receives `RecvError::Lagged`.
pub struct InProcEventBus {
    sender: broadcast::Sender<MigrationEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a bus buffering up to `capacity` events.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Events kept per subscriber. A subscriber that falls
    ///   further behind receives `RecvError::Lagged` and skips ahead.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Buffer size the bus was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl MigrationEventPublisher for InProcEventBus {
    async fn publish(&self, event: MigrationEvent) -> anyhow::Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.sender.subscribe()
    }
}
