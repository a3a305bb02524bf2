//! Basic migration example against the in-memory fake cluster.
//!
//! Submits a dry run, then a real migration with a one-off placement
//! addition, and prints the lifecycle events as they arrive.
//!
//! Run with `RUST_LOG=relocate=debug` to see the runtime's tracing output.

use std::time::Duration;

use relocate::*;
use relocate_testkit::{fast_config, FakeCluster, StepBehavior, TestHarness};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cluster = FakeCluster::new()
        .with_node(Node::new("node-a").with_label("zone", "vmi"))
        .with_node(
            Node::new("node-b")
                .with_label("zone", "vmi")
                .with_label("disk", "ssd"),
        )
        .with_node(Node::new("node-c").with_label("zone", "edge"));

    let harness = TestHarness::new(fast_config(), cluster)?;
    harness
        .transfer
        .set_transfer(StepBehavior::CompleteAfter(Duration::from_millis(200)));
    let fedora = harness
        .add_workload("fedora", "node-a", &[("zone", "vmi")])
        .await;

    let mut events = harness.gateway.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("[EVENT] {} {:?}", event.migration_id, event.payload);
        }
    });

    let options = SubmitOptions::new().with_added_placement_list("disk=ssd,zone=edge");

    if let Submission::DryRun(report) = harness
        .gateway
        .submit(&fedora, options.clone().with_dry_run(true))
        .await?
    {
        println!("{report}");
        println!("  target placement: {:?}", report.target_placement);
        println!("  dropped keys:     {:?}", report.dropped_keys);
    }

    let submission = harness.gateway.submit(&fedora, options).await?;
    let Some(receipt) = submission.into_receipt() else {
        anyhow::bail!("submission was not admitted");
    };
    println!("{receipt}");

    let done = receipt.handle.wait_terminal().await;
    println!("migration {} finished in phase {}", done.id, done.phase());
    if let Some(reason) = &done.status.failure_reason {
        println!("  reason: {reason}");
    }

    let workload = harness.workload(&fedora).await;
    println!(
        "fedora now runs on {:?}",
        workload.and_then(|w| w.status.current_node)
    );

    harness.gateway.shutdown().await?;
    Ok(())
}
