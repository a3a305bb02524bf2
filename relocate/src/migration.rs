//! Lifecycle of a single migration attempt.
//!
//! The phase order is fixed:
//!
//! ```text
//! Pending -> Scheduling -> Scheduled -> PreparingTarget -> TargetReady
//!         -> TransferInProgress -> Succeeded
//! ```
//!
//! `Failed` is reachable from every non-terminal phase. `Succeeded` and
//! `Failed` are terminal: once reached, the request no longer changes.
//! [`next_phase`] is the pure transition function; [`MigrationRequest::apply`]
//! applies it to a request and records the bookkeeping that goes with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::TransitionError;
use crate::workload::{MigrationId, NodeName, PlacementMap, WorkloadId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    Pending,
    Scheduling,
    Scheduled,
    PreparingTarget,
    TargetReady,
    TransferInProgress,
    Succeeded,
    Failed,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 8] = [
        MigrationPhase::Pending,
        MigrationPhase::Scheduling,
        MigrationPhase::Scheduled,
        MigrationPhase::PreparingTarget,
        MigrationPhase::TargetReady,
        MigrationPhase::TransferInProgress,
        MigrationPhase::Succeeded,
        MigrationPhase::Failed,
    ];

    /// `Succeeded` or `Failed`. No transition leaves a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Snake-case name used in logs, metrics and event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduling => "scheduling",
            Self::Scheduled => "scheduled",
            Self::PreparingTarget => "preparing_target",
            Self::TargetReady => "target_ready",
            Self::TransferInProgress => "transfer_in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a migration ended in [`MigrationPhase::Failed`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A bounded wait elapsed. In `Scheduling` this is how an unsatisfiable
    /// placement shows up.
    Timeout { phase: MigrationPhase, waited_ms: u64 },
    /// Explicit cancellation, including runtime shutdown.
    Cancelled { reason: String },
    /// The state-transfer collaborator reported an error.
    TransferError { message: String },
    /// The target context disappeared or could not be created.
    TargetLost { message: String },
    /// Another migration of the same workload was active at submission.
    ConflictAtAdmission { active: MigrationId },
}

impl FailureReason {
    /// Short label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::TransferError { .. } => "transfer_error",
            Self::TargetLost { .. } => "target_lost",
            Self::ConflictAtAdmission { .. } => "conflict_at_admission",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { phase, waited_ms } => {
                write!(f, "timed out in phase {phase} after {waited_ms}ms")
            }
            Self::Cancelled { reason } => write!(f, "cancelled: {reason}"),
            Self::TransferError { message } => write!(f, "state transfer failed: {message}"),
            Self::TargetLost { message } => write!(f, "target context lost: {message}"),
            Self::ConflictAtAdmission { active } => {
                write!(f, "migration {active} is already active for this workload")
            }
        }
    }
}

/// Input to the lifecycle state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PhaseEvent {
    /// Admission succeeded; scheduling starts.
    Admitted,
    /// The target context was bound to a node satisfying the target placement.
    TargetPlaced { node: NodeName },
    /// The target context started preparing to receive state.
    PreparingTarget,
    /// The target context reported readiness.
    TargetReady,
    /// State transfer started.
    TransferStarted,
    /// State transfer finished; the workload now runs on the target.
    TransferCompleted,
    /// No eligible node was found within the scheduling bound.
    SchedulingTimedOut { waited_ms: u64 },
    /// Any other terminal failure.
    Fail(FailureReason),
}

impl PhaseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::TargetPlaced { .. } => "target_placed",
            Self::PreparingTarget => "preparing_target",
            Self::TargetReady => "target_ready",
            Self::TransferStarted => "transfer_started",
            Self::TransferCompleted => "transfer_completed",
            Self::SchedulingTimedOut { .. } => "scheduling_timed_out",
            Self::Fail(_) => "fail",
        }
    }
}

/// Pure transition function of the lifecycle state machine.
pub fn next_phase(
    current: MigrationPhase,
    event: &PhaseEvent,
) -> Result<MigrationPhase, TransitionError> {
    use MigrationPhase as P;

    if current.is_terminal() {
        return Err(TransitionError::Terminal { phase: current });
    }

    let next = match (current, event) {
        (_, PhaseEvent::Fail(_)) => P::Failed,
        (P::Pending, PhaseEvent::Admitted) => P::Scheduling,
        (P::Scheduling, PhaseEvent::TargetPlaced { .. }) => P::Scheduled,
        (P::Scheduling, PhaseEvent::SchedulingTimedOut { .. }) => P::Failed,
        (P::Scheduled, PhaseEvent::PreparingTarget) => P::PreparingTarget,
        (P::PreparingTarget, PhaseEvent::TargetReady) => P::TargetReady,
        (P::TargetReady, PhaseEvent::TransferStarted) => P::TransferInProgress,
        (P::TransferInProgress, PhaseEvent::TransferCompleted) => P::Succeeded,
        (phase, event) => {
            return Err(TransitionError::InvalidEvent {
                phase,
                event: event.name(),
            });
        }
    };
    Ok(next)
}

/// One applied transition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: MigrationPhase,
    pub to: MigrationPhase,
    pub at: DateTime<Utc>,
}

/// Input side of a migration request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MigrationSpec {
    /// One-off placement addition for this attempt only.
    pub added_placement: PlacementMap,
    pub dry_run: bool,
}

/// Output side of a migration request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub phase: MigrationPhase,
    /// Present only when `phase` is `Failed`.
    pub failure_reason: Option<FailureReason>,
    /// Placement of the target context. Cleared once the phase is terminal.
    pub target_placement: Option<PlacementMap>,
    pub source_node: Option<NodeName>,
    pub target_node: Option<NodeName>,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One migration attempt for one workload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub id: MigrationId,
    pub workload: WorkloadId,
    pub spec: MigrationSpec,
    pub status: MigrationStatus,
}

impl MigrationRequest {
    /// Create a `Pending` request.
    ///
    /// # Arguments
    ///
    /// * `workload` - Workload to move.
    /// * `spec` - Immutable submission options.
    /// * `source_node` - Node the workload runs on at admission, if known.
    pub fn new(workload: WorkloadId, spec: MigrationSpec, source_node: Option<NodeName>) -> Self {
        Self {
            id: MigrationId::new(),
            workload,
            spec,
            status: MigrationStatus {
                phase: MigrationPhase::Pending,
                failure_reason: None,
                target_placement: None,
                source_node,
                target_node: None,
                transitions: Vec::new(),
                created_at: Utc::now(),
                completed_at: None,
            },
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> MigrationPhase {
        self.status.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.status.phase.is_terminal()
    }

    /// Attach the resolved target placement while the attempt is live.
    pub fn set_target_placement(&mut self, placement: PlacementMap) {
        if !self.is_terminal() {
            self.status.target_placement = Some(placement);
        }
    }

    /// Apply an event, recording the transition.
    ///
    /// Terminal requests reject every event and stay unchanged.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<PhaseTransition, TransitionError> {
        let from = self.status.phase;
        let to = next_phase(from, &event)?;
        let at = Utc::now();

        match event {
            PhaseEvent::TargetPlaced { node } => self.status.target_node = Some(node),
            PhaseEvent::SchedulingTimedOut { waited_ms } => {
                self.status.failure_reason = Some(FailureReason::Timeout {
                    phase: from,
                    waited_ms,
                });
            }
            PhaseEvent::Fail(reason) => self.status.failure_reason = Some(reason),
            _ => {}
        }

        self.status.phase = to;
        if to.is_terminal() {
            self.status.completed_at = Some(at);
            self.status.target_placement = None;
        }

        let transition = PhaseTransition { from, to, at };
        self.status.transitions.push(transition.clone());
        Ok(transition)
    }
}
