//! Error types for the execution engine.

use sesh_core::types::{ActionStatus, ActionType, PlanStatus, StepStatus};
use uuid::Uuid;

/// An illegal lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid plan transition: {0} -> {1}")]
    Plan(PlanStatus, PlanStatus),
    #[error("Invalid step transition: {0} -> {1}")]
    Step(StepStatus, StepStatus),
    #[error("Invalid action transition: {0} -> {1}")]
    Action(ActionStatus, ActionStatus),
}

/// Errors from plan construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(Uuid),
    #[error("Duplicate step number: {0}")]
    DuplicateStepNumber(u32),
    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: Uuid, dependency: Uuid },
    #[error("Cyclic step dependency involving step {0}")]
    CyclicDependency(Uuid),
    #[error("Step {step} belongs to plan {owner}")]
    ForeignStep { step: Uuid, owner: Uuid },
    #[error("Step not found in plan: {0}")]
    UnknownStep(Uuid),
    #[error("Plan must be pending to be submitted, found {0}")]
    NotPending(PlanStatus),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Failure reported by a tool executor, or imposed on it by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Execution cancelled")]
    Cancelled,
    /// The execution context (terminal session, repository, workspace) is
    /// gone. Aborts the whole batch.
    #[error("Execution context lost: {0}")]
    FatalContextLost(String),
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),
}

impl ExecutionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::FatalContextLost(_))
    }
}

/// Errors returned by `ExecutionEngine` operations.
///
/// Every variant is reported before any state changes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),
    #[error("Step not found: {0}")]
    StepNotFound(Uuid),
    #[error("Action not found: {0}")]
    ActionNotFound(Uuid),
    #[error("Plan already submitted: {0}")]
    DuplicatePlan(Uuid),
    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Batch of {size} actions exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("Cannot submit an empty batch")]
    EmptyBatch,
    #[error("Action {0} is not awaiting confirmation")]
    NotAwaitingConfirmation(Uuid),
    #[error("Edited details required to edit and approve action {0}")]
    MissingEditedDetails(Uuid),
    #[error("Edited details must keep action type {expected}, got {found}")]
    DetailsMismatch {
        expected: ActionType,
        found: ActionType,
    },
    #[error("Only failed actions can be resubmitted, action {0} is {1}")]
    NotResubmittable(Uuid, ActionStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError::Plan(PlanStatus::Completed, PlanStatus::Executing);
        assert_eq!(
            err.to_string(),
            "Invalid plan transition: completed -> executing"
        );

        let err = TransitionError::Action(ActionStatus::Pending, ActionStatus::Completed);
        assert_eq!(
            err.to_string(),
            "Invalid action transition: pending -> completed"
        );
    }

    #[test]
    fn test_plan_error_wraps_transition() {
        let err: PlanError = TransitionError::Step(StepStatus::Completed, StepStatus::Pending).into();
        assert_eq!(
            err.to_string(),
            "Invalid step transition: completed -> pending"
        );
    }

    #[test]
    fn test_engine_error_from_plan_error() {
        let id = Uuid::new_v4();
        let err: EngineError = PlanError::CyclicDependency(id).into();
        assert!(matches!(err, EngineError::InvalidPlan(_)));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_execution_error_fatal() {
        assert!(ExecutionError::FatalContextLost("pty closed".to_string()).is_fatal());
        assert!(!ExecutionError::ExecutionFailed("exit 1".to_string()).is_fatal());
        assert!(!ExecutionError::Cancelled.is_fatal());
        assert_eq!(
            ExecutionError::Timeout(30).to_string(),
            "Execution timed out after 30 seconds"
        );
    }

    #[test]
    fn test_details_mismatch_display() {
        let err = EngineError::DetailsMismatch {
            expected: ActionType::FileEdit,
            found: ActionType::TerminalCommand,
        };
        assert_eq!(
            err.to_string(),
            "Edited details must keep action type file_edit, got terminal_command"
        );
    }
}
