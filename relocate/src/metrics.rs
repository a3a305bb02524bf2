//! Prometheus metrics for relocate.
//!
//! Compiled only with the `metrics` feature.
//!
//! ## Counters
//! - `relocate_migrations_submitted_total` - Admitted submissions
//! - `relocate_migrations_rejected_total` - Rejected submissions, by reason code
//! - `relocate_migrations_completed_total` - Terminal outcomes
//! - `relocate_phase_transitions_total` - Phase transitions, by edge
//!
//! ## Gauges
//! - `relocate_active_migrations` - Non-terminal migrations
//!
//! ## Histograms
//! - `relocate_migration_duration_seconds` - Admission to terminal phase
#![cfg(feature = "metrics")]

use prometheus::{
    exponential_buckets, Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static MIGRATIONS_SUBMITTED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    Counter::new(
        "relocate_migrations_submitted_total",
        "Total number of admitted migration submissions",
    )
    .expect("relocate_migrations_submitted_total metric creation failed")
});

/// Labels: `reason` (stable rejection code).
pub static MIGRATIONS_REJECTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "relocate_migrations_rejected_total",
        "Total number of rejected migration submissions",
    );
    CounterVec::new(opts, &["reason"])
        .expect("relocate_migrations_rejected_total metric creation failed")
});

/// Labels: `outcome` (succeeded, failed).
pub static MIGRATIONS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "relocate_migrations_completed_total",
        "Total number of migrations that reached a terminal phase",
    );
    CounterVec::new(opts, &["outcome"])
        .expect("relocate_migrations_completed_total metric creation failed")
});

/// Labels: `from`, `to`.
pub static PHASE_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "relocate_phase_transitions_total",
        "Total number of migration phase transitions",
    );
    CounterVec::new(opts, &["from", "to"])
        .expect("relocate_phase_transitions_total metric creation failed")
});

pub static ACTIVE_MIGRATIONS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "relocate_active_migrations",
        "Current number of non-terminal migrations",
    )
    .expect("relocate_active_migrations metric creation failed")
});

/// Labels: `outcome`.
pub static MIGRATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 16).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "relocate_migration_duration_seconds",
        "Migration duration from admission to terminal phase",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["outcome"])
        .expect("relocate_migration_duration_seconds metric creation failed")
});

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(MIGRATIONS_SUBMITTED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(MIGRATIONS_REJECTED_TOTAL.clone()),
        Box::new(MIGRATIONS_COMPLETED_TOTAL.clone()),
        Box::new(PHASE_TRANSITIONS_TOTAL.clone()),
        Box::new(ACTIVE_MIGRATIONS.clone()),
        Box::new(MIGRATION_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Count an admitted submission.
pub fn record_submitted() {
    MIGRATIONS_SUBMITTED_TOTAL.inc();
}

/// Count a rejected submission under its result code.
pub fn record_rejected(reason: &str) {
    MIGRATIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_phase_transition(from: &str, to: &str) {
    PHASE_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
}

/// Count a finished migration and observe how long it ran.
pub fn record_migration_completed(outcome: &str, duration_secs: f64) {
    MIGRATIONS_COMPLETED_TOTAL
        .with_label_values(&[outcome])
        .inc();
    MIGRATION_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn set_active_migrations(count: f64) {
    ACTIVE_MIGRATIONS.set(count);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_submitted();
        record_rejected("rejected_malformed_input");
        record_phase_transition("pending", "scheduling");
        record_migration_completed("succeeded", 1.5);
        set_active_migrations(2.0);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("relocate_migrations_submitted_total"));
        assert!(output.contains("relocate_migrations_rejected_total"));
        assert!(output.contains("relocate_phase_transitions_total"));
        assert!(output.contains("relocate_migration_duration_seconds"));
    }
}
