//! In-memory audit log.

use std::sync::Mutex;

use sesh_core::audit::{AuditLog, ExecutionAuditEntry};
use sesh_core::types::{ThreadId, Timestamp};
use uuid::Uuid;

/// Append-only audit log held in memory. Used by tests and by hosts that
/// do not persist audit history.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<ExecutionAuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in append order.
    pub fn entries(&self) -> Vec<ExecutionAuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, pred: impl Fn(&ExecutionAuditEntry) -> bool) -> Vec<ExecutionAuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: &ExecutionAuditEntry) -> sesh_core::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    fn by_thread(&self, thread_id: &ThreadId) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        Ok(self.select(|e| &e.thread_id == thread_id))
    }

    fn by_plan(&self, plan_id: Uuid) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        Ok(self.select(|e| e.plan_id == Some(plan_id)))
    }

    fn in_range(&self, from: Timestamp, to: Timestamp) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        Ok(self.select(|e| e.timestamp >= from && e.timestamp <= to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesh_core::types::{ActionType, ApprovalSource, ExecutionMode, RiskLevel};

    fn entry(thread: &str, plan_id: Option<Uuid>, ts: i64) -> ExecutionAuditEntry {
        ExecutionAuditEntry {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            thread_id: ThreadId::from(thread),
            plan_id,
            plan_step_id: None,
            action_type: ActionType::Information,
            risk_level: RiskLevel::Safe,
            mode: ExecutionMode::Autonomous,
            user_approved: false,
            approval: ApprovalSource::Policy,
            success: true,
            error: None,
            result: Some("ok".to_string()),
            details: serde_json::json!({"type": "information", "message": "hi"}),
            modified_details: None,
            timestamp: Timestamp(ts),
        }
    }

    #[test]
    fn test_queries_keep_append_order() {
        let log = MemoryAuditLog::new();
        let plan = Uuid::new_v4();
        let e1 = entry("a", Some(plan), 10);
        let e2 = entry("b", None, 20);
        let e3 = entry("a", Some(plan), 30);
        for e in [&e1, &e2, &e3] {
            log.append(e).unwrap();
        }

        assert_eq!(log.len(), 3);
        assert_eq!(
            log.by_thread(&ThreadId::from("a")).unwrap(),
            vec![e1.clone(), e3.clone()]
        );
        assert_eq!(log.by_plan(plan).unwrap(), vec![e1, e3.clone()]);
        assert_eq!(
            log.in_range(Timestamp(20), Timestamp(30)).unwrap(),
            vec![e2, e3]
        );
    }

    #[test]
    fn test_empty_log() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        assert!(log.by_thread(&ThreadId::from("a")).unwrap().is_empty());
    }
}
