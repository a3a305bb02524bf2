//! Fake collaborators for testing relocate without a cluster.
//!
//! - [`FakeCluster`]: a scheduler that binds targets to labelled nodes
//! - [`MockTransfer`]: a recording state transfer with scripted outcomes
//! - [`TestHarness`]: a gateway wired to both plus an in-memory store

pub mod fixtures;
pub mod scheduler;
pub mod transfer;

pub use fixtures::{fast_config, placement, TestGateway, TestHarness, TestRuntime};
pub use scheduler::FakeCluster;
pub use transfer::{MockTransfer, StepBehavior, TransferCall, TransferStep};
