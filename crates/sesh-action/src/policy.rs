//! Confirmation policy.
//!
//! Pure function of the execution mode, the action and one settings snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};
use sesh_core::settings::ExecutionSettings;
use sesh_core::types::{ActionType, ExecutionMode, RiskLevel};

use crate::types::ExecutionAction;

/// A rule that forced a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationReason {
    AssistedMode,
    DangerousAction,
    GitOperation,
    FileDeletion,
}

impl fmt::Display for ConfirmationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationReason::AssistedMode => write!(f, "assisted mode confirms every action"),
            ConfirmationReason::DangerousAction => write!(f, "action is dangerous"),
            ConfirmationReason::GitOperation => write!(f, "git operations always need confirmation"),
            ConfirmationReason::FileDeletion => write!(f, "file deletions always need confirmation"),
        }
    }
}

pub struct ConfirmationPolicy;

impl ConfirmationPolicy {
    /// Whether the action must wait for the user before executing.
    pub fn requires_confirmation(
        mode: ExecutionMode,
        action: &ExecutionAction,
        settings: &ExecutionSettings,
    ) -> bool {
        !Self::reasons(mode, action, settings).is_empty()
    }

    /// Every rule that fires for this action. Empty means auto-approve.
    pub fn reasons(
        mode: ExecutionMode,
        action: &ExecutionAction,
        settings: &ExecutionSettings,
    ) -> Vec<ConfirmationReason> {
        let mut reasons = Vec::new();
        match mode {
            ExecutionMode::Assisted => reasons.push(ConfirmationReason::AssistedMode),
            ExecutionMode::Autonomous => {
                if action.risk_level == RiskLevel::Dangerous && settings.always_confirm_dangerous {
                    reasons.push(ConfirmationReason::DangerousAction);
                }
                if action.action_type == ActionType::GitOperation
                    && settings.always_confirm_git_operations
                {
                    reasons.push(ConfirmationReason::GitOperation);
                }
                if action.action_type == ActionType::FileDelete
                    && settings.always_confirm_file_deletions
                {
                    reasons.push(ConfirmationReason::FileDeletion);
                }
            }
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionDetails;
    use sesh_core::types::ThreadId;
    use uuid::Uuid;

    fn action(details: ActionDetails) -> ExecutionAction {
        ExecutionAction::new(ThreadId::from("t1"), Uuid::new_v4(), details, None, None)
    }

    fn all_off() -> ExecutionSettings {
        ExecutionSettings {
            always_confirm_dangerous: false,
            always_confirm_git_operations: false,
            always_confirm_file_deletions: false,
            ..ExecutionSettings::default()
        }
    }

    fn samples() -> Vec<ExecutionAction> {
        vec![
            action(ActionDetails::Information {
                message: "hi".to_string(),
            }),
            action(ActionDetails::FileEdit {
                path: "a".to_string(),
                old_content: None,
                new_content: "b".to_string(),
            }),
            action(ActionDetails::FileDelete {
                path: "a".to_string(),
            }),
            action(ActionDetails::TerminalCommand {
                command: "ls".to_string(),
                cwd: None,
            }),
            action(ActionDetails::GitOperation {
                operation: "status".to_string(),
                args: Vec::new(),
            }),
        ]
    }

    #[test]
    fn test_assisted_always_confirms() {
        for settings in [ExecutionSettings::default(), all_off()] {
            for a in samples() {
                assert!(ConfirmationPolicy::requires_confirmation(
                    ExecutionMode::Assisted,
                    &a,
                    &settings
                ));
            }
        }
    }

    #[test]
    fn test_autonomous_matches_rule_formula() {
        let flags = [false, true];
        for dangerous in flags {
            for git in flags {
                for delete in flags {
                    let settings = ExecutionSettings {
                        always_confirm_dangerous: dangerous,
                        always_confirm_git_operations: git,
                        always_confirm_file_deletions: delete,
                        ..ExecutionSettings::default()
                    };
                    for a in samples() {
                        let expected = (a.risk_level == RiskLevel::Dangerous && dangerous)
                            || (a.action_type == ActionType::GitOperation && git)
                            || (a.action_type == ActionType::FileDelete && delete);
                        assert_eq!(
                            ConfirmationPolicy::requires_confirmation(
                                ExecutionMode::Autonomous,
                                &a,
                                &settings
                            ),
                            expected,
                            "{} with {:?}",
                            a.action_type,
                            (dangerous, git, delete)
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_autonomous_file_delete_override() {
        let settings = ExecutionSettings {
            always_confirm_dangerous: false,
            always_confirm_file_deletions: true,
            ..ExecutionSettings::default()
        };
        let delete = action(ActionDetails::FileDelete {
            path: "x".to_string(),
        });
        assert_eq!(
            ConfirmationPolicy::reasons(ExecutionMode::Autonomous, &delete, &settings),
            vec![ConfirmationReason::FileDeletion]
        );
    }

    #[test]
    fn test_autonomous_safe_action_auto_approved() {
        let info = action(ActionDetails::Information {
            message: "ok".to_string(),
        });
        assert!(ConfirmationPolicy::reasons(
            ExecutionMode::Autonomous,
            &info,
            &ExecutionSettings::default()
        )
        .is_empty());
    }
}
