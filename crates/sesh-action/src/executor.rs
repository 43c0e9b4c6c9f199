//! Tool executor seam.
//!
//! The engine never performs side effects itself. File primitives, git and
//! the terminal bridge live behind `ToolExecutor`.

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExecutionError;
use crate::types::{ActionDetails, ExecutionAction};

/// Performs the side effect of one approved action.
///
/// Called at most once per action and never retried. The action's
/// `effective_details()` are the details to execute.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, action: &ExecutionAction) -> Result<String, ExecutionError>;
}

/// Executor that only reports what it would have done.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for DryRunExecutor {
    async fn execute(&self, action: &ExecutionAction) -> Result<String, ExecutionError> {
        let details = action.effective_details();
        debug!(action_id = %action.id, action_type = %action.action_type, "Dry run");
        let summary = match details {
            ActionDetails::FileEdit { new_content, .. } => {
                format!("{} ({} bytes)", details.describe(), new_content.len())
            }
            ActionDetails::FileCreate { content, .. } => {
                format!("{} ({} bytes)", details.describe(), content.len())
            }
            _ => details.describe(),
        };
        Ok(format!("[dry run] {}", summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesh_core::types::ThreadId;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dry_run_reports_effective_details() {
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
        action.user_modified_details = Some(ActionDetails::TerminalCommand {
            command: "make check".to_string(),
            cwd: None,
        });

        let out = DryRunExecutor::new().execute(&action).await.unwrap();
        assert_eq!(out, "[dry run] Run `make check`");
    }

    #[tokio::test]
    async fn test_dry_run_file_create_reports_size() {
        let action = ExecutionAction::new(
            ThreadId::from("t1"),
            Uuid::new_v4(),
            ActionDetails::FileCreate {
                path: "notes.md".to_string(),
                content: "hello".to_string(),
            },
            None,
            None,
        );
        let out = DryRunExecutor.execute(&action).await.unwrap();
        assert_eq!(out, "[dry run] Create notes.md (5 bytes)");
    }
}
