//! Relocate - live-migration placement and lifecycle orchestration.
//!
//! Moves a running VM workload to another node. A migration may narrow the
//! set of eligible nodes with a one-off placement addition; the addition is
//! merged with the workload's own constraints so that it can only restrict
//! placement, and it is never written back to the workload.
//!
//! # Core Concepts
//!
//! - **Placement**: [`merge`] and [`TargetPlacement`] combine a workload's
//!   persistent placement map with a migration's addition. The workload's
//!   values always win.
//!
//! - **Lifecycle**: [`MigrationRequest`] walks the [`MigrationPhase`] state
//!   machine from `Pending` to `Succeeded` or `Failed`. Every failure carries
//!   a [`FailureReason`].
//!
//! - **Gateway**: [`MigrationGateway`] validates submissions and admits at
//!   most one non-terminal migration per workload.
//!
//! - **Target contexts**: [`TargetContextBuilder`] creates the ephemeral
//!   target through a [`TargetScheduler`] and waits, bounded, for placement.
//!
//! - **Runtime**: [`MigrationRuntime`] drives each admitted migration on its
//!   own task and tears targets down on failure, cancellation and shutdown.
//!
//! - **Events**: [`InProcEventBus`] broadcasts [`MigrationEvent`]s.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use relocate::*;
//!
//! let runtime = MigrationRuntimeBuilder::new(MigrationConfig::default())
//!     .with_store(store)
//!     .with_scheduler(scheduler)
//!     .with_transfer(transfer)
//!     .build()?;
//! let gateway = MigrationGateway::new(Arc::new(runtime));
//!
//! let options = SubmitOptions::new().with_added_placement_list("zone=b");
//! let submission = gateway.submit(&"ns/fedora".parse()?, options).await?;
//! ```

/// Migration runtime configuration and per-submission options.
pub mod config;

/// Error types returned at the gateway and state-machine boundaries.
pub mod error;

/// Lifecycle event publishing.
///
/// - [`MigrationEvent`] and [`MigrationEventPayload`] for event data
/// - [`MigrationEventPublisher`] for pub/sub
/// - [`InProcEventBus`] for in-process broadcasting
pub mod events;

/// Submission validation and admission.
pub mod gateway;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

/// Migration requests and the lifecycle state machine.
pub mod migration;

/// Placement constraint merging and parsing.
pub mod placement;

/// Single-active-migration registry.
pub mod registry;

/// Migration runtime, per-migration tasks and handles.
pub mod runtime;

/// Workload store boundary and migration snapshots.
pub mod store;

/// Scheduler boundary for target contexts.
pub mod target;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

/// State-transfer boundary.
pub mod transfer;

/// Workloads, nodes and identifiers.
pub mod workload;

pub use config::*;
pub use error::*;
pub use events::*;
pub use gateway::*;
pub use migration::*;
pub use placement::*;
pub use registry::*;
pub use runtime::*;
pub use store::*;
pub use target::*;
pub use transfer::*;
pub use workload::*;
