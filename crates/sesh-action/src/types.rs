//! Core types and value objects for the execution engine.
//!
//! Defines action details, queued actions, standalone proposals and
//! confirmation decisions.

use serde::{Deserialize, Serialize};
use sesh_core::types::{
    ActionStatus, ActionType, ApprovalSource, RiskLevel, SkipReason, ThreadId, Timestamp,
};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Details
// =============================================================================

/// What an action does, tagged by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDetails {
    FileEdit {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_content: Option<String>,
        new_content: String,
    },
    FileCreate {
        path: String,
        content: String,
    },
    FileDelete {
        path: String,
    },
    TerminalCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    GitOperation {
        operation: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Information {
        message: String,
    },
}

/// Git subcommands that only read repository state.
const GIT_READ_ONLY: &[&str] = &["status", "diff", "log", "show", "branch", "fetch"];

/// Git subcommands that rewrite history, discard work or touch remotes.
const GIT_DESTRUCTIVE: &[&str] = &[
    "push", "pull", "reset", "rebase", "checkout", "discard", "clean", "merge",
];

impl ActionDetails {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionDetails::FileEdit { .. } => ActionType::FileEdit,
            ActionDetails::FileCreate { .. } => ActionType::FileCreate,
            ActionDetails::FileDelete { .. } => ActionType::FileDelete,
            ActionDetails::TerminalCommand { .. } => ActionType::TerminalCommand,
            ActionDetails::GitOperation { .. } => ActionType::GitOperation,
            ActionDetails::Information { .. } => ActionType::Information,
        }
    }

    /// Risk implied by the details alone.
    pub fn classify_risk(&self) -> RiskLevel {
        match self {
            ActionDetails::Information { .. } => RiskLevel::Safe,
            ActionDetails::FileEdit { .. } | ActionDetails::FileCreate { .. } => {
                RiskLevel::Moderate
            }
            ActionDetails::FileDelete { .. } | ActionDetails::TerminalCommand { .. } => {
                RiskLevel::Dangerous
            }
            ActionDetails::GitOperation { operation, .. } => {
                let op = normalize_git_operation(operation);
                if GIT_READ_ONLY.contains(&op.as_str()) {
                    RiskLevel::Safe
                } else if GIT_DESTRUCTIVE.contains(&op.as_str()) {
                    RiskLevel::Dangerous
                } else {
                    RiskLevel::Moderate
                }
            }
        }
    }

    /// One-line human-readable summary.
    pub fn describe(&self) -> String {
        match self {
            ActionDetails::FileEdit { path, .. } => format!("Edit {}", path),
            ActionDetails::FileCreate { path, .. } => format!("Create {}", path),
            ActionDetails::FileDelete { path } => format!("Delete {}", path),
            ActionDetails::TerminalCommand { command, cwd } => match cwd {
                Some(dir) => format!("Run `{}` in {}", command, dir),
                None => format!("Run `{}`", command),
            },
            ActionDetails::GitOperation { operation, args } => {
                if args.is_empty() {
                    format!("git {}", operation)
                } else {
                    format!("git {} {}", operation, args.join(" "))
                }
            }
            ActionDetails::Information { message } => message.clone(),
        }
    }

    /// JSON form used by the audit log.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn normalize_git_operation(operation: &str) -> String {
    let op = operation.trim().to_ascii_lowercase();
    let op = op.strip_prefix("git ").unwrap_or(&op).trim();
    op.split_whitespace().next().unwrap_or("").to_string()
}

// =============================================================================
// Actions
// =============================================================================

/// A concrete, risk-classified unit of work in a thread's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAction {
    pub id: Uuid,
    pub thread_id: ThreadId,
    pub batch_id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub risk_level: RiskLevel,
    pub status: ActionStatus,
    pub description: String,
    /// Details as proposed. Never changed after creation.
    pub details: ActionDetails,
    /// Details as approved by the user, when they edited them.
    pub user_modified_details: Option<ActionDetails>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub plan_id: Option<Uuid>,
    pub plan_step_id: Option<Uuid>,
    /// Actions in the same batch that must complete first.
    pub depends_on: Vec<Uuid>,
    /// Who approved execution, once decided.
    pub approval: Option<ApprovalSource>,
    pub skip_reason: Option<SkipReason>,
    /// Approval or rejection note.
    pub note: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl ExecutionAction {
    /// Build a pending action. The effective risk is the higher of the
    /// classified and the declared risk.
    pub fn new(
        thread_id: ThreadId,
        batch_id: Uuid,
        details: ActionDetails,
        description: Option<String>,
        declared_risk: Option<RiskLevel>,
    ) -> Self {
        let classified = details.classify_risk();
        let risk_level = declared_risk.map_or(classified, |r| r.max(classified));
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| details.describe());
        Self {
            id: Uuid::new_v4(),
            thread_id,
            batch_id,
            action_type: details.action_type(),
            risk_level,
            status: ActionStatus::Pending,
            description,
            details,
            user_modified_details: None,
            result: None,
            error: None,
            plan_id: None,
            plan_step_id: None,
            depends_on: Vec::new(),
            approval: None,
            skip_reason: None,
            note: None,
            created_at: Timestamp::now(),
            completed_at: None,
        }
    }

    /// The details that are (or were) actually executed.
    pub fn effective_details(&self) -> &ActionDetails {
        self.user_modified_details.as_ref().unwrap_or(&self.details)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A standalone action proposed outside of any plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub details: ActionDetails,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
}

impl ActionProposal {
    pub fn new(details: ActionDetails) -> Self {
        Self {
            details,
            description: None,
            risk_level: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }
}

// =============================================================================
// Confirmation
// =============================================================================

/// The user's answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    Approve,
    Reject,
    EditAndApprove,
}

impl fmt::Display for ConfirmationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationDecision::Approve => write!(f, "approve"),
            ConfirmationDecision::Reject => write!(f, "reject"),
            ConfirmationDecision::EditAndApprove => write!(f, "edit_and_approve"),
        }
    }
}

impl std::str::FromStr for ConfirmationDecision {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ConfirmationDecision::Approve),
            "reject" => Ok(ConfirmationDecision::Reject),
            "edit_and_approve" => Ok(ConfirmationDecision::EditAndApprove),
            _ => Err(format!("Unknown confirmation decision: {}", s)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn git(op: &str) -> ActionDetails {
        ActionDetails::GitOperation {
            operation: op.to_string(),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_details_serialize_with_type_tag() {
        let details = ActionDetails::TerminalCommand {
            command: "cargo fmt".to_string(),
            cwd: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "terminal_command");
        assert_eq!(json["command"], "cargo fmt");
        assert!(json.get("cwd").is_none());
    }

    #[test]
    fn test_details_deserialize_from_tagged_json() {
        let details: ActionDetails = serde_json::from_str(
            r#"{"type":"file_edit","path":"src/lib.rs","new_content":"fn main() {}"}"#,
        )
        .unwrap();
        assert_eq!(details.action_type(), ActionType::FileEdit);
        assert!(matches!(
            details,
            ActionDetails::FileEdit { old_content: None, .. }
        ));
    }

    #[test]
    fn test_unknown_detail_type_rejected() {
        let result: Result<ActionDetails, _> =
            serde_json::from_str(r#"{"type":"launch_missiles","target":"moon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_risk_by_type() {
        let info = ActionDetails::Information {
            message: "done".to_string(),
        };
        assert_eq!(info.classify_risk(), RiskLevel::Safe);

        let create = ActionDetails::FileCreate {
            path: "a.txt".to_string(),
            content: String::new(),
        };
        assert_eq!(create.classify_risk(), RiskLevel::Moderate);

        let delete = ActionDetails::FileDelete {
            path: "a.txt".to_string(),
        };
        assert_eq!(delete.classify_risk(), RiskLevel::Dangerous);

        let term = ActionDetails::TerminalCommand {
            command: "ls".to_string(),
            cwd: None,
        };
        assert_eq!(term.classify_risk(), RiskLevel::Dangerous);
    }

    #[test]
    fn test_classify_git_operations() {
        assert_eq!(git("status").classify_risk(), RiskLevel::Safe);
        assert_eq!(git("git log").classify_risk(), RiskLevel::Safe);
        assert_eq!(git("  Diff ").classify_risk(), RiskLevel::Safe);
        assert_eq!(git("commit").classify_risk(), RiskLevel::Moderate);
        assert_eq!(git("add").classify_risk(), RiskLevel::Moderate);
        assert_eq!(git("push").classify_risk(), RiskLevel::Dangerous);
        assert_eq!(git("reset --hard").classify_risk(), RiskLevel::Dangerous);
    }

    #[test]
    fn test_declared_risk_can_only_raise() {
        let thread = ThreadId::from("t1");
        let edit = ActionDetails::FileEdit {
            path: "a".to_string(),
            old_content: None,
            new_content: "b".to_string(),
        };

        let lowered = ExecutionAction::new(
            thread.clone(),
            Uuid::new_v4(),
            edit.clone(),
            None,
            Some(RiskLevel::Safe),
        );
        assert_eq!(lowered.risk_level, RiskLevel::Moderate);

        let raised = ExecutionAction::new(
            thread,
            Uuid::new_v4(),
            edit,
            None,
            Some(RiskLevel::Dangerous),
        );
        assert_eq!(raised.risk_level, RiskLevel::Dangerous);
    }

    #[test]
    fn test_action_defaults_description_from_details() {
        let action = ExecutionAction::new(
            ThreadId::from("t1"),
            Uuid::new_v4(),
            ActionDetails::FileDelete {
                path: "old.rs".to_string(),
            },
            Some("   ".to_string()),
            None,
        );
        assert_eq!(action.description, "Delete old.rs");
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.action_type, ActionType::FileDelete);
    }

    #[test]
    fn test_effective_details_prefers_user_edit() {
        let mut action = ExecutionAction::new(
            ThreadId::from("t1"),
            Uuid::new_v4(),
            ActionDetails::TerminalCommand {
                command: "make".to_string(),
                cwd: None,
            },
            None,
            None,
        );
        assert_eq!(action.effective_details(), &action.details.clone());

        let edited = ActionDetails::TerminalCommand {
            command: "make test".to_string(),
            cwd: None,
        };
        action.user_modified_details = Some(edited.clone());
        assert_eq!(action.effective_details(), &edited);
        assert!(matches!(
            action.details,
            ActionDetails::TerminalCommand { ref command, .. } if command == "make"
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            ActionDetails::GitOperation {
                operation: "commit".to_string(),
                args: vec!["-m".to_string(), "wip".to_string()],
            }
            .describe(),
            "git commit -m wip"
        );
        assert_eq!(
            ActionDetails::TerminalCommand {
                command: "ls".to_string(),
                cwd: Some("/tmp".to_string()),
            }
            .describe(),
            "Run `ls` in /tmp"
        );
    }

    #[test]
    fn test_confirmation_decision_roundtrip() {
        for d in [
            ConfirmationDecision::Approve,
            ConfirmationDecision::Reject,
            ConfirmationDecision::EditAndApprove,
        ] {
            let parsed: ConfirmationDecision = d.to_string().parse().unwrap();
            assert_eq!(parsed, d);
        }
        assert!("maybe".parse::<ConfirmationDecision>().is_err());
    }
}
