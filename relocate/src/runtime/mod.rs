/// Per-migration task driving the lifecycle.
mod actor;
/// Builder for constructing migration runtimes.
pub mod builder;
/// Handles returned for admitted migrations.
pub mod handle;
/// Runtime owning the running migrations and shutdown.
pub mod supervisor;

pub use builder::MigrationRuntimeBuilder;
pub use handle::MigrationHandle;
pub use supervisor::{MigrationRuntime, ShutdownToken};
