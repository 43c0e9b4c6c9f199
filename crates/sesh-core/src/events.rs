use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::ExecutionAuditEntry;
use crate::types::{
    ActionStatus, ActionType, ExecutionProgress, PlanStatus, RiskLevel, StepStatus, ThreadId,
    Timestamp,
};

/// All domain events emitted by the execution engine.
///
/// Events are published on a broadcast channel after state changes and
/// consumed by:
/// - Progress and audit subscriptions (filtered per thread)
/// - UI layers rendering plans and confirmation prompts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Plan Events
    // =========================================================================
    /// A materialized plan was accepted into a thread's queue.
    PlanSubmitted {
        thread_id: ThreadId,
        plan_id: Uuid,
        total_steps: usize,
        timestamp: Timestamp,
    },

    /// A plan moved to a new lifecycle state.
    PlanStatusChanged {
        thread_id: ThreadId,
        plan_id: Uuid,
        status: PlanStatus,
        timestamp: Timestamp,
    },

    /// A plan step moved to a new lifecycle state.
    StepStatusChanged {
        thread_id: ThreadId,
        plan_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Action Events
    // =========================================================================
    /// An action was added to a thread's queue.
    ActionQueued {
        thread_id: ThreadId,
        action_id: Uuid,
        batch_id: Uuid,
        action_type: ActionType,
        risk_level: RiskLevel,
        timestamp: Timestamp,
    },

    /// An action moved to a new lifecycle state.
    ActionStatusChanged {
        thread_id: ThreadId,
        action_id: Uuid,
        status: ActionStatus,
        timestamp: Timestamp,
    },

    /// The queue is blocked until the user answers for this action.
    ConfirmationRequested {
        thread_id: ThreadId,
        action_id: Uuid,
        description: String,
        risk_level: RiskLevel,
        reasons: Vec<String>,
        timestamp: Timestamp,
    },

    /// Batch progress was recomputed.
    ProgressUpdated {
        progress: ExecutionProgress,
        timestamp: Timestamp,
    },

    /// An executed action was written to the audit log.
    AuditAppended { entry: ExecutionAuditEntry },

    // =========================================================================
    // System Events
    // =========================================================================
    /// Execution settings were replaced.
    SettingsUpdated { timestamp: Timestamp },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::PlanSubmitted { timestamp, .. }
            | DomainEvent::PlanStatusChanged { timestamp, .. }
            | DomainEvent::StepStatusChanged { timestamp, .. }
            | DomainEvent::ActionQueued { timestamp, .. }
            | DomainEvent::ActionStatusChanged { timestamp, .. }
            | DomainEvent::ConfirmationRequested { timestamp, .. }
            | DomainEvent::ProgressUpdated { timestamp, .. }
            | DomainEvent::SettingsUpdated { timestamp } => *timestamp,
            DomainEvent::AuditAppended { entry } => entry.timestamp,
        }
    }

    /// Returns a human-readable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::PlanSubmitted { .. } => "plan_submitted",
            DomainEvent::PlanStatusChanged { .. } => "plan_status_changed",
            DomainEvent::StepStatusChanged { .. } => "step_status_changed",
            DomainEvent::ActionQueued { .. } => "action_queued",
            DomainEvent::ActionStatusChanged { .. } => "action_status_changed",
            DomainEvent::ConfirmationRequested { .. } => "confirmation_requested",
            DomainEvent::ProgressUpdated { .. } => "progress_updated",
            DomainEvent::AuditAppended { .. } => "audit_appended",
            DomainEvent::SettingsUpdated { .. } => "settings_updated",
        }
    }

    /// The thread this event belongs to, if any.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            DomainEvent::PlanSubmitted { thread_id, .. }
            | DomainEvent::PlanStatusChanged { thread_id, .. }
            | DomainEvent::StepStatusChanged { thread_id, .. }
            | DomainEvent::ActionQueued { thread_id, .. }
            | DomainEvent::ActionStatusChanged { thread_id, .. }
            | DomainEvent::ConfirmationRequested { thread_id, .. } => Some(thread_id),
            DomainEvent::ProgressUpdated { progress, .. } => Some(&progress.thread_id),
            DomainEvent::AuditAppended { entry } => Some(&entry.thread_id),
            DomainEvent::SettingsUpdated { .. } => None,
        }
    }
}
