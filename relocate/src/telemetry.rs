//! Tracing and telemetry instrumentation for relocate.
//!
//! Span constructors for the migration lifecycle and `record_*` helpers that
//! log an event and, with the `metrics` feature, update the Prometheus
//! metrics in [`crate::metrics`]. Every helper works without the feature.
//!
//! # Example
//!
//! ```ignore
//! use relocate::telemetry::{migration_span, record_submitted};
//!
//! let span = migration_span(&migration_id, &workload);
//! record_submitted(&workload);
//! ```

use std::future::Future;
use tracing::{info_span, Instrument, Span};

use crate::migration::MigrationPhase;

/// Span covering a whole migration, from admission to terminal phase.
#[must_use]
pub fn migration_span(migration_id: impl AsRef<str>, workload: impl AsRef<str>) -> Span {
    info_span!(
        "relocate.migration",
        migration_id = %migration_id.as_ref(),
        workload = %workload.as_ref(),
    )
}

/// Span covering one submission through the gateway.
#[must_use]
pub fn submit_span(workload: impl AsRef<str>, dry_run: bool) -> Span {
    info_span!(
        "relocate.submit",
        workload = %workload.as_ref(),
        dry_run = dry_run,
    )
}

/// Span covering target creation and the bounded wait for placement.
#[must_use]
pub fn schedule_span(migration_id: impl AsRef<str>, target: impl AsRef<str>) -> Span {
    info_span!(
        "relocate.schedule",
        migration_id = %migration_id.as_ref(),
        target = %target.as_ref(),
    )
}

/// Span covering target preparation and state transfer.
#[must_use]
pub fn transfer_span(migration_id: impl AsRef<str>, target_node: impl AsRef<str>) -> Span {
    info_span!(
        "relocate.transfer",
        migration_id = %migration_id.as_ref(),
        target_node = %target_node.as_ref(),
    )
}

/// Attach a migration span to a future.
pub fn instrument_migration<F>(
    migration_id: impl AsRef<str>,
    workload: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(migration_span(migration_id, workload))
}

/// Record an admitted submission.
///
/// # Arguments
///
/// * `workload` - Display form of the workload id
pub fn record_submitted(workload: impl AsRef<str>) {
    tracing::info!(workload = %workload.as_ref(), "migration submitted");

    #[cfg(feature = "metrics")]
    crate::metrics::record_submitted();
}

/// Record a rejected submission under its stable rejection code.
pub fn record_rejected(workload: impl AsRef<str>, code: &str) {
    tracing::warn!(workload = %workload.as_ref(), code = code, "migration rejected");

    #[cfg(feature = "metrics")]
    crate::metrics::record_rejected(code);
}

/// Record a lifecycle transition.
///
/// # Arguments
///
/// * `migration_id` - Migration that moved
/// * `from` - Phase before the transition
/// * `to` - Phase after the transition
pub fn record_phase_transition(
    migration_id: impl AsRef<str>,
    from: MigrationPhase,
    to: MigrationPhase,
) {
    tracing::info!(
        migration_id = %migration_id.as_ref(),
        from = %from,
        to = %to,
        "migration phase changed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_phase_transition(from.as_str(), to.as_str());
}

/// Update the number of non-terminal migrations.
pub fn set_active_migrations(count: usize) {
    tracing::debug!(active = count, "active migrations updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_active_migrations(count as f64);
}

/// Start timing a migration. Consumed by [`record_migration_completed`].
pub fn record_migration_start(migration_id: impl AsRef<str>) -> MigrationTimingHandle {
    MigrationTimingHandle {
        migration_id: migration_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Record a terminal outcome and its end-to-end duration.
pub fn record_migration_completed(handle: MigrationTimingHandle, outcome: MigrationPhase) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    tracing::info!(
        migration_id = %handle.migration_id,
        outcome = %outcome,
        duration_secs = duration_secs,
        "migration finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_migration_completed(outcome.as_str(), duration_secs);
}

/// Opaque start marker for a migration's duration.
#[derive(Debug)]
pub struct MigrationTimingHandle {
    migration_id: String,
    start: std::time::Instant,
}

impl MigrationTimingHandle {
    #[must_use]
    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instrumented_future_returns_output() {
        let value = instrument_migration("m-1", "ns/vm", async { 7 }).await;
        assert_eq!(value, 7);
    }

    #[test]
    fn test_timing_handle() {
        let handle = record_migration_start("m-1");
        assert_eq!(handle.migration_id(), "m-1");

        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(handle.elapsed().as_nanos() > 0);

        record_migration_completed(handle, MigrationPhase::Succeeded);
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_submitted("ns/vm");
        record_rejected("ns/vm", "rejected_malformed_input");
        record_phase_transition("m-1", MigrationPhase::Pending, MigrationPhase::Scheduling);
        set_active_migrations(3);
        let _span = submit_span("ns/vm", true);
        let _span = schedule_span("m-1", "target-1");
        let _span = transfer_span("m-1", "node-b");
    }
}
