use crate::migration::{FailureReason, MigrationPhase};
use crate::workload::{MigrationId, WorkloadId};

/// A placement entry that did not parse as `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid format for placement entry `{entry}`: expected key=value")]
    MalformedEntry { entry: String },
    #[error("placement entry `{entry}` has an empty key")]
    EmptyKey { entry: String },
    #[error("placement entry `{entry}` has an empty value")]
    EmptyValue { entry: String },
}

impl ValidationError {
    /// The raw entry that was rejected.
    pub fn entry(&self) -> &str {
        match self {
            Self::MalformedEntry { entry } | Self::EmptyKey { entry } | Self::EmptyValue { entry } => {
                entry
            }
        }
    }
}

/// Synchronous rejection of a migration submission.
///
/// Nothing is created when one of these is returned. Failures that happen
/// after admission are never reported here; they are recorded on the
/// migration's status instead.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("workload {workload} already has an active migration {active}")]
    Conflict {
        workload: WorkloadId,
        active: MigrationId,
    },
    #[error("workload {0} not found")]
    WorkloadNotFound(WorkloadId),
    #[error("migration runtime is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SubmissionError {
    /// Stable result code reported at the gateway boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "rejected_malformed_input",
            Self::Conflict { .. } => "rejected_conflicting_active_migration",
            Self::WorkloadNotFound(_) => "rejected_unknown_workload",
            Self::ShuttingDown => "rejected_shutting_down",
            Self::Store(_) => "rejected_store_error",
        }
    }

    /// Failure cause for rejections that map onto the lifecycle taxonomy.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Conflict { active, .. } => {
                Some(FailureReason::ConflictAtAdmission { active: *active })
            }
            _ => None,
        }
    }
}

/// An event that the lifecycle state machine refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("migration already reached terminal phase {phase}")]
    Terminal { phase: MigrationPhase },
    #[error("event `{event}` is not valid in phase {phase}")]
    InvalidEvent {
        phase: MigrationPhase,
        event: &'static str,
    },
}
