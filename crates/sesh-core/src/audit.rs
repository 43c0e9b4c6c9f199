//! Append-only audit trail of executed actions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{ActionType, ApprovalSource, ExecutionMode, RiskLevel, ThreadId, Timestamp};

/// One immutable record per executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAuditEntry {
    pub id: Uuid,
    pub action_id: Uuid,
    pub thread_id: ThreadId,
    pub plan_id: Option<Uuid>,
    pub plan_step_id: Option<Uuid>,
    pub action_type: ActionType,
    pub risk_level: RiskLevel,
    pub mode: ExecutionMode,
    pub user_approved: bool,
    pub approval: ApprovalSource,
    pub success: bool,
    pub error: Option<String>,
    pub result: Option<String>,
    /// Details as proposed.
    pub details: serde_json::Value,
    /// Details as executed, when the user edited them before approving.
    pub modified_details: Option<serde_json::Value>,
    pub timestamp: Timestamp,
}

/// Storage for audit entries.
///
/// There is deliberately no update or delete: entries are only appended.
/// Queries return entries in append order.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &ExecutionAuditEntry) -> Result<()>;

    fn by_thread(&self, thread_id: &ThreadId) -> Result<Vec<ExecutionAuditEntry>>;

    fn by_plan(&self, plan_id: Uuid) -> Result<Vec<ExecutionAuditEntry>>;

    /// Entries with `from <= timestamp <= to`.
    fn in_range(&self, from: Timestamp, to: Timestamp) -> Result<Vec<ExecutionAuditEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_entry_serde_keeps_details() {
        let entry = ExecutionAuditEntry {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            thread_id: ThreadId::from("t1"),
            plan_id: None,
            plan_step_id: None,
            action_type: ActionType::TerminalCommand,
            risk_level: RiskLevel::Dangerous,
            mode: ExecutionMode::Assisted,
            user_approved: true,
            approval: ApprovalSource::User,
            success: false,
            error: Some("exit status 1".to_string()),
            result: None,
            details: serde_json::json!({"type": "terminal_command", "command": "make"}),
            modified_details: Some(
                serde_json::json!({"type": "terminal_command", "command": "make test"}),
            ),
            timestamp: Timestamp(1_700_000_000),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let rt: ExecutionAuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(rt, entry);
    }
}
