use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums - Classification
// =============================================================================

/// Risk classification of a skill or an action.
///
/// Ordered: `Safe < Moderate < Dangerous`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Safe,
    Moderate,
    Dangerous,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::Dangerous => write!(f, "dangerous"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(RiskLevel::Safe),
            "moderate" => Ok(RiskLevel::Moderate),
            "dangerous" => Ok(RiskLevel::Dangerous),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Declared execution mode of a thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every action waits for explicit user approval.
    #[default]
    Assisted,
    /// Actions run without approval unless a settings override fires.
    Autonomous,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Assisted => write!(f, "assisted"),
            ExecutionMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assisted" => Ok(ExecutionMode::Assisted),
            "autonomous" => Ok(ExecutionMode::Autonomous),
            _ => Err(format!("Unknown execution mode: {}", s)),
        }
    }
}

/// Kind of side effect an action (or plan step) performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FileEdit,
    FileCreate,
    FileDelete,
    TerminalCommand,
    GitOperation,
    Information,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::FileEdit => write!(f, "file_edit"),
            ActionType::FileCreate => write!(f, "file_create"),
            ActionType::FileDelete => write!(f, "file_delete"),
            ActionType::TerminalCommand => write!(f, "terminal_command"),
            ActionType::GitOperation => write!(f, "git_operation"),
            ActionType::Information => write!(f, "information"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_edit" => Ok(ActionType::FileEdit),
            "file_create" => Ok(ActionType::FileCreate),
            "file_delete" => Ok(ActionType::FileDelete),
            "terminal_command" => Ok(ActionType::TerminalCommand),
            "git_operation" => Ok(ActionType::GitOperation),
            "information" => Ok(ActionType::Information),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

// =============================================================================
// Enums - Lifecycle States
// =============================================================================

/// Plan lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Generating,
    Pending,
    Approved,
    Executing,
    Completed,
    Partial,
    Cancelled,
    Error,
}

impl PlanStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Partial | PlanStatus::Cancelled | PlanStatus::Error
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Generating => write!(f, "generating"),
            PlanStatus::Pending => write!(f, "pending"),
            PlanStatus::Approved => write!(f, "approved"),
            PlanStatus::Executing => write!(f, "executing"),
            PlanStatus::Completed => write!(f, "completed"),
            PlanStatus::Partial => write!(f, "partial"),
            PlanStatus::Cancelled => write!(f, "cancelled"),
            PlanStatus::Error => write!(f, "error"),
        }
    }
}

/// Plan step lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Rejected | StepStatus::Completed | StepStatus::Error | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Approved => write!(f, "approved"),
            StepStatus::Rejected => write!(f, "rejected"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Error => write!(f, "error"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Execution action lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    AwaitingConfirmation,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Rejected
                | ActionStatus::Completed
                | ActionStatus::Failed
                | ActionStatus::Skipped
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            ActionStatus::Approved => write!(f, "approved"),
            ActionStatus::Rejected => write!(f, "rejected"),
            ActionStatus::Executing => write!(f, "executing"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Aggregate status of a submitted batch (one plan or one group of
/// standalone actions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Partial,
    Error,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Partial
                | BatchStatus::Error
                | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Queued => write!(f, "queued"),
            BatchStatus::Running => write!(f, "running"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Partial => write!(f, "partial"),
            BatchStatus::Error => write!(f, "error"),
            BatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Who approved an action for execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSource {
    /// No confirmation was required by the policy.
    Policy,
    /// The user answered a confirmation request.
    User,
    /// The user approved the source plan step (or the whole plan) ahead of time.
    Step,
}

impl ApprovalSource {
    /// Whether a human approved the action.
    pub fn is_user(&self) -> bool {
        !matches!(self, ApprovalSource::Policy)
    }
}

impl fmt::Display for ApprovalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalSource::Policy => write!(f, "policy"),
            ApprovalSource::User => write!(f, "user"),
            ApprovalSource::Step => write!(f, "step"),
        }
    }
}

impl std::str::FromStr for ApprovalSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "policy" => Ok(ApprovalSource::Policy),
            "user" => Ok(ApprovalSource::User),
            "step" => Ok(ApprovalSource::Step),
            _ => Err(format!("Unknown approval source: {}", s)),
        }
    }
}

/// Terminal upstream cause of a skipped step or action.
///
/// A skip caused by another skip carries the original cause, so the user
/// always sees the root of the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum SkipReason {
    DependencyRejected { upstream: Uuid },
    DependencyFailed { upstream: Uuid },
    PlanCancelled,
    ActionCancelled,
    StopOnError { failed: Uuid },
    ContextLost { failed: Uuid },
}

impl SkipReason {
    /// Whether the root cause was a rejection rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SkipReason::DependencyRejected { .. })
    }

    /// Whether the skip came from an explicit cancellation rather than an
    /// upstream rejection or failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SkipReason::PlanCancelled | SkipReason::ActionCancelled)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DependencyRejected { upstream } => {
                write!(f, "dependency {} was rejected", upstream)
            }
            SkipReason::DependencyFailed { upstream } => {
                write!(f, "dependency {} failed", upstream)
            }
            SkipReason::PlanCancelled => write!(f, "plan was cancelled"),
            SkipReason::ActionCancelled => write!(f, "action was cancelled"),
            SkipReason::StopOnError { failed } => {
                write!(f, "batch stopped after {} failed", failed)
            }
            SkipReason::ContextLost { failed } => {
                write!(f, "execution context lost while running {}", failed)
            }
        }
    }
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Identifier of a conversation thread owning plans and an action queue.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unix timestamp in seconds since epoch.
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Aggregate progress of one batch, recomputed after every action state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub thread_id: ThreadId,
    pub batch_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub status: BatchStatus,
    pub total_actions: usize,
    pub completed_actions: usize,
    pub failed_actions: usize,
    pub skipped_actions: usize,
    pub rejected_actions: usize,
    pub current_action: Option<Uuid>,
    /// Completed share of the batch in percent (0.0 - 100.0).
    pub percentage: f64,
}

impl ExecutionProgress {
    /// Percentage of completed actions. Zero for an empty batch.
    pub fn percentage_of(completed: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        }
    }

    /// Actions that reached a terminal state.
    pub fn finished_actions(&self) -> usize {
        self.completed_actions + self.failed_actions + self.skipped_actions + self.rejected_actions
    }
}

// =============================================================================
// Tests
// =============================================================================
