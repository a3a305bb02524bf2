use relocate::{
    InMemoryWorkloadStore, InProcEventBus, MigrationConfig, MigrationEventPublisher,
    MigrationGateway, MigrationRuntime, MigrationRuntimeBuilder, PlacementMap, Workload,
    WorkloadId,
};
use std::sync::Arc;

use crate::scheduler::FakeCluster;
use crate::transfer::MockTransfer;

pub type TestRuntime = MigrationRuntime<InMemoryWorkloadStore, FakeCluster, MockTransfer>;
pub type TestGateway = MigrationGateway<InMemoryWorkloadStore, FakeCluster, MockTransfer>;

/// Config with short bounds suitable for tests.
pub fn fast_config() -> MigrationConfig {
    MigrationConfig::default()
        .with_scheduling_timeout(2_000)
        .with_readiness_timeout(2_000)
        .with_transfer_timeout(2_000)
        .with_poll_interval(10)
        .with_shutdown_grace(2_000)
}

/// Placement map from `(key, value)` pairs.
pub fn placement(pairs: &[(&str, &str)]) -> PlacementMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A gateway wired to in-memory collaborators.
pub struct TestHarness {
    pub store: Arc<InMemoryWorkloadStore>,
    pub cluster: Arc<FakeCluster>,
    pub transfer: Arc<MockTransfer>,
    pub events: Arc<InProcEventBus>,
    pub gateway: TestGateway,
}

impl TestHarness {
    /// Wire a gateway over `cluster` with an empty store and a mock transfer.
    pub fn new(config: MigrationConfig, cluster: FakeCluster) -> anyhow::Result<Self> {
        let store = Arc::new(InMemoryWorkloadStore::new());
        let cluster = Arc::new(cluster);
        let transfer = Arc::new(MockTransfer::new());
        let events = Arc::new(InProcEventBus::new(config.event_capacity));

        let runtime = MigrationRuntimeBuilder::new(config)
            .with_store(Arc::clone(&store))
            .with_scheduler(Arc::clone(&cluster))
            .with_transfer(Arc::clone(&transfer))
            .with_events(Arc::clone(&events) as Arc<dyn MigrationEventPublisher>)
            .build()?;

        Ok(Self {
            store,
            cluster,
            transfer,
            events,
            gateway: MigrationGateway::new(Arc::new(runtime)),
        })
    }

    pub fn with_cluster(cluster: FakeCluster) -> anyhow::Result<Self> {
        Self::new(fast_config(), cluster)
    }

    /// Register a workload running on `node` with the given placement.
    pub async fn add_workload(
        &self,
        name: &str,
        node: &str,
        pairs: &[(&str, &str)],
    ) -> WorkloadId {
        let id = WorkloadId::new("default", name);
        self.store
            .insert(
                Workload::new(id.clone())
                    .with_placement(placement(pairs))
                    .running_on(node),
            )
            .await;
        id
    }

    /// Stored state of a workload.
    pub async fn workload(&self, id: &WorkloadId) -> Option<Workload> {
        self.store.get(id).await
    }
}
