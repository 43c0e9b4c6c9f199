//! Validated lifecycle transitions for plans, steps and actions.
//!
//! Plan: Generating -> Pending -> Approved -> Executing -> Completed/Partial/Cancelled/Error
//! Step: Pending -> Approved/Rejected, Approved -> InProgress -> Completed/Error,
//!       Pending/Approved -> Skipped
//! Action: Pending -> AwaitingConfirmation -> Approved/Rejected, Approved -> Executing
//!         -> Completed/Failed, Pending -> Executing when no confirmation is needed

use crate::error::TransitionError;
use sesh_core::types::{ActionStatus, PlanStatus, StepStatus};

/// Validate a plan status transition.
///
/// Valid transitions:
/// - Generating -> Pending | Cancelled | Error
/// - Pending -> Approved | Cancelled
/// - Pending -> Completed (empty plan) | Partial (every step settled without executing)
/// - Approved -> Executing | Cancelled | Partial
/// - Executing -> Completed | Partial | Cancelled | Error
pub fn validate_plan_transition(from: PlanStatus, to: PlanStatus) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (PlanStatus::Generating, PlanStatus::Pending)
            | (PlanStatus::Generating, PlanStatus::Cancelled)
            | (PlanStatus::Generating, PlanStatus::Error)
            | (PlanStatus::Pending, PlanStatus::Approved)
            | (PlanStatus::Pending, PlanStatus::Cancelled)
            | (PlanStatus::Pending, PlanStatus::Completed)
            | (PlanStatus::Pending, PlanStatus::Partial)
            | (PlanStatus::Approved, PlanStatus::Executing)
            | (PlanStatus::Approved, PlanStatus::Cancelled)
            | (PlanStatus::Approved, PlanStatus::Partial)
            | (PlanStatus::Executing, PlanStatus::Completed)
            | (PlanStatus::Executing, PlanStatus::Partial)
            | (PlanStatus::Executing, PlanStatus::Cancelled)
            | (PlanStatus::Executing, PlanStatus::Error)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError::Plan(from, to))
    }
}

/// Validate a plan step status transition.
pub fn validate_step_transition(from: StepStatus, to: StepStatus) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (StepStatus::Pending, StepStatus::Approved)
            | (StepStatus::Pending, StepStatus::Rejected)
            | (StepStatus::Pending, StepStatus::Skipped)
            | (StepStatus::Approved, StepStatus::InProgress)
            | (StepStatus::Approved, StepStatus::Skipped)
            | (StepStatus::InProgress, StepStatus::Completed)
            | (StepStatus::InProgress, StepStatus::Error)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError::Step(from, to))
    }
}

/// Validate an action status transition.
pub fn validate_action_transition(
    from: ActionStatus,
    to: ActionStatus,
) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (ActionStatus::Pending, ActionStatus::AwaitingConfirmation)
            | (ActionStatus::Pending, ActionStatus::Executing)
            | (ActionStatus::Pending, ActionStatus::Approved)
            | (ActionStatus::Pending, ActionStatus::Rejected)
            | (ActionStatus::Pending, ActionStatus::Skipped)
            | (ActionStatus::AwaitingConfirmation, ActionStatus::Approved)
            | (ActionStatus::AwaitingConfirmation, ActionStatus::Rejected)
            | (ActionStatus::AwaitingConfirmation, ActionStatus::Skipped)
            | (ActionStatus::Approved, ActionStatus::Executing)
            | (ActionStatus::Approved, ActionStatus::Skipped)
            | (ActionStatus::Executing, ActionStatus::Completed)
            | (ActionStatus::Executing, ActionStatus::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError::Action(from, to))
    }
}
