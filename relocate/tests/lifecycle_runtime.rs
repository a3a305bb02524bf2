//! Runtime lifecycle tests: construction, shutdown and collaborator stress.

use std::sync::Arc;
use std::time::Duration;

use relocate::{
    FailureReason, InMemoryWorkloadStore, MigrationConfig, MigrationPhase, MigrationRequest,
    MigrationRuntimeBuilder, MigrationSpec, Node, PlacementMap, SubmissionError, SubmitOptions,
    TargetPlacement,
};
use relocate_testkit::{fast_config, FakeCluster, MockTransfer, StepBehavior, TestHarness};
use tokio::time::timeout;

fn cluster() -> FakeCluster {
    let mut cluster = FakeCluster::new();
    for i in 0..4 {
        cluster = cluster.with_node(Node::new(format!("node-{i}")).with_label("pool", "general"));
    }
    cluster
}

#[tokio::test]
async fn test_builder_requires_collaborators() {
    let result = MigrationRuntimeBuilder::<InMemoryWorkloadStore, FakeCluster, MockTransfer>::new(
        MigrationConfig::default(),
    )
    .with_store(Arc::new(InMemoryWorkloadStore::new()))
    .with_transfer(Arc::new(MockTransfer::new()))
    .build();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("scheduler dependency missing"));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let config = MigrationConfig::from_json(r#"{"scheduling_timeout_ms": 10}"#).unwrap();
    let config = MigrationConfig {
        placement_poll_interval_ms: 0,
        ..config
    };

    let result = MigrationRuntimeBuilder::new(config)
        .with_store(Arc::new(InMemoryWorkloadStore::new()))
        .with_scheduler(Arc::new(FakeCluster::new()))
        .with_transfer(Arc::new(MockTransfer::new()))
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_migrations_and_rejects_new_ones() {
    let harness = TestHarness::with_cluster(cluster()).unwrap();
    harness.transfer.set_transfer(StepBehavior::Hang);

    let mut handles = Vec::new();
    for i in 0..3 {
        let id = harness
            .add_workload(&format!("vm-{i}"), "node-0", &[("pool", "general")])
            .await;
        let submission = harness
            .gateway
            .submit(&id, SubmitOptions::new())
            .await
            .unwrap();
        handles.push(submission.into_receipt().unwrap().handle);
    }
    // One migration parked in scheduling, the rest in transfer.
    let parked = harness
        .add_workload("vm-parked", "node-0", &[("pool", "gpu")])
        .await;
    let submission = harness
        .gateway
        .submit(&parked, SubmitOptions::new())
        .await
        .unwrap();
    handles.push(submission.into_receipt().unwrap().handle);

    for handle in &handles[..3] {
        timeout(
            Duration::from_secs(1),
            handle.wait_for_phase(MigrationPhase::TransferInProgress),
        )
        .await
        .unwrap();
    }

    timeout(Duration::from_secs(5), harness.gateway.shutdown())
        .await
        .expect("shutdown did not complete")
        .unwrap();

    for handle in &handles {
        let done = handle.current();
        assert_eq!(done.phase(), MigrationPhase::Failed);
        assert!(matches!(
            done.status.failure_reason,
            Some(FailureReason::Cancelled { .. })
        ));
    }
    harness.cluster.assert_no_live_targets();
    assert!(harness.gateway.runtime().registry().is_empty().await);

    let id = harness
        .add_workload("late", "node-0", &[("pool", "general")])
        .await;
    let err = harness
        .gateway
        .submit(&id, SubmitOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::ShuttingDown));
}

#[tokio::test]
async fn test_spawn_after_shutdown_is_refused_and_releases_claim() {
    let harness = TestHarness::with_cluster(cluster()).unwrap();
    let id = harness
        .add_workload("vm-late", "node-0", &[("pool", "general")])
        .await;
    let runtime = harness.gateway.runtime();

    // Admitted just before shutdown began.
    let request = MigrationRequest::new(
        id.clone(),
        MigrationSpec::default(),
        Some("node-0".into()),
    );
    let claim = runtime
        .registry()
        .try_claim(&id, request.id)
        .await
        .unwrap();
    runtime.shutdown().await.unwrap();

    let placement = TargetPlacement::resolve(&PlacementMap::new(), &PlacementMap::new());
    let err = runtime
        .spawn_migration(request, placement, claim)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::ShuttingDown));
    assert!(runtime.registry().is_empty().await);
    assert_eq!(harness.cluster.create_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_workloads_migrate_in_parallel() {
    let harness = Arc::new(
        TestHarness::new(fast_config(), cluster()).unwrap(),
    );
    harness
        .transfer
        .set_transfer(StepBehavior::CompleteAfter(Duration::from_millis(20)));

    let mut ids = Vec::new();
    for i in 0..24 {
        ids.push(
            harness
                .add_workload(&format!("vm-{i}"), "node-0", &[("pool", "general")])
                .await,
        );
    }

    let tasks: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                let receipt = harness
                    .gateway
                    .submit(&id, SubmitOptions::new())
                    .await
                    .unwrap()
                    .into_receipt()
                    .unwrap();
                receipt.handle.wait_terminal().await
            })
        })
        .collect();

    let results = timeout(Duration::from_secs(10), futures::future::join_all(tasks))
        .await
        .expect("migrations did not finish");

    for result in results {
        assert_eq!(result.unwrap().phase(), MigrationPhase::Succeeded);
    }
    for id in &ids {
        let workload = harness.workload(id).await.unwrap();
        assert_eq!(workload.status.current_node.unwrap().as_str(), "node-1");
    }
    assert_eq!(harness.cluster.create_calls(), 24);
    assert!(harness.cluster.teardowns().is_empty());
}
