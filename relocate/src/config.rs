use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds and tuning for the migration runtime.
///
/// Every wait on an external collaborator is bounded by one of these
/// timeouts. When a bound elapses the migration fails with
/// [`FailureReason::Timeout`](crate::migration::FailureReason::Timeout).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// How long to wait for a node satisfying the target placement.
    pub scheduling_timeout_ms: u64,
    /// How long the target context may take to become ready.
    pub readiness_timeout_ms: u64,
    /// How long the state transfer may take once started.
    pub transfer_timeout_ms: u64,
    /// Interval between placement checks when the scheduler has no push channel.
    pub placement_poll_interval_ms: u64,
    /// Capacity of the in-process lifecycle event channel.
    pub event_capacity: usize,
    /// How long shutdown waits for each in-flight migration to wind down.
    pub shutdown_grace_ms: u64,
    /// Number of migrations a gateway tracks before it forgets finished ones.
    ///
    /// Reaching the limit on a submission drops every terminal handle; live
    /// migrations are never dropped.
    pub tracked_migrations_limit: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            scheduling_timeout_ms: 300_000, // 5 minutes
            readiness_timeout_ms: 300_000,
            transfer_timeout_ms: 900_000, // 15 minutes
            placement_poll_interval_ms: 1_000,
            event_capacity: 256,
            shutdown_grace_ms: 30_000,
            tracked_migrations_limit: 1_024,
        }
    }
}

impl MigrationConfig {
    /// Load a configuration from JSON. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not valid JSON for this type or if the
    /// result fails [`MigrationConfig::validate`].
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make waits unbounded or spin.
    ///
    /// # Errors
    ///
    /// Names the first field holding a zero bound or capacity.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduling_timeout_ms == 0 {
            anyhow::bail!("scheduling_timeout_ms must be greater than zero");
        }
        if self.readiness_timeout_ms == 0 || self.transfer_timeout_ms == 0 {
            anyhow::bail!("readiness and transfer timeouts must be greater than zero");
        }
        if self.placement_poll_interval_ms == 0 {
            anyhow::bail!("placement_poll_interval_ms must be greater than zero");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be greater than zero");
        }
        if self.tracked_migrations_limit == 0 {
            anyhow::bail!("tracked_migrations_limit must be greater than zero");
        }
        Ok(())
    }

    /// Set the scheduling bound, in milliseconds. Covers target creation and
    /// the wait for a node.
    pub fn with_scheduling_timeout(mut self, ms: u64) -> Self {
        self.scheduling_timeout_ms = ms;
        self
    }

    /// Set the target readiness bound, in milliseconds.
    pub fn with_readiness_timeout(mut self, ms: u64) -> Self {
        self.readiness_timeout_ms = ms;
        self
    }

    /// Set the state transfer bound, in milliseconds.
    pub fn with_transfer_timeout(mut self, ms: u64) -> Self {
        self.transfer_timeout_ms = ms;
        self
    }

    /// Set the interval between placement checks, in milliseconds.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.placement_poll_interval_ms = ms;
        self
    }

    /// Set the per-migration shutdown wait, in milliseconds.
    pub fn with_shutdown_grace(mut self, ms: u64) -> Self {
        self.shutdown_grace_ms = ms;
        self
    }

    /// Set how many migrations a gateway tracks before pruning finished ones.
    pub fn with_tracked_migrations_limit(mut self, limit: usize) -> Self {
        self.tracked_migrations_limit = limit;
        self
    }

    /// [`MigrationConfig::scheduling_timeout_ms`] as a [`Duration`].
    pub fn scheduling_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduling_timeout_ms)
    }

    /// [`MigrationConfig::readiness_timeout_ms`] as a [`Duration`].
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// [`MigrationConfig::transfer_timeout_ms`] as a [`Duration`].
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Interval between binding checks while scheduling.
    pub fn placement_poll_interval(&self) -> Duration {
        Duration::from_millis(self.placement_poll_interval_ms)
    }

    /// Per-migration wait during shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Options of one submission, built once per call and passed by value.
///
/// Placement entries are kept raw (`key=value`) so that the gateway owns
/// validation and can reject the whole submission on a malformed entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    added_placement: Vec<String>,
    dry_run: bool,
}

impl SubmitOptions {
    /// Options with no placement addition and no dry run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add placement entries, each `key=value`.
    pub fn with_added_placement<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.added_placement
            .extend(entries.into_iter().map(Into::into));
        self
    }

    /// Add entries from a comma-separated list such as `zone=a,team=b`.
    pub fn with_added_placement_list(self, list: &str) -> Self {
        self.with_added_placement(list.split(',').filter(|entry| !entry.is_empty()))
    }

    /// Resolve the placement and report it without starting a migration.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Raw `key=value` entries, unvalidated.
    pub fn added_placement(&self) -> &[String] {
        &self.added_placement
    }

    /// Whether this submission only reports what it would do.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}
