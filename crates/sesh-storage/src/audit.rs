//! SQLite-backed execution audit log.
//!
//! Entries are only ever inserted. Queries return them in insertion order.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::types::ToSql;
use rusqlite::Row;
use tracing::debug;
use uuid::Uuid;

use sesh_core::audit::{AuditLog, ExecutionAuditEntry};
use sesh_core::error::SeshError;
use sesh_core::types::{ThreadId, Timestamp};

use crate::db::{storage_err, Database};

const SELECT_COLUMNS: &str = "SELECT id, action_id, thread_id, plan_id, plan_step_id, action_type,
            risk_level, mode, user_approved, approval, success, error, result,
            details, modified_details, timestamp
     FROM execution_audit";

pub struct SqliteAuditLog {
    db: Arc<Database>,
}

impl SqliteAuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: u64) -> Result<Vec<ExecutionAuditEntry>, SeshError> {
        let sql = format!("{} ORDER BY seq DESC LIMIT ?1", SELECT_COLUMNS);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(&sql, &[&limit])
    }

    pub fn count(&self) -> Result<u64, SeshError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM execution_audit", [], |row| row.get(0))
                .map_err(storage_err("Audit count"))?;
            Ok(n as u64)
        })
    }

    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<ExecutionAuditEntry>, SeshError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(storage_err("Audit query prepare"))?;
            let rows = stmt
                .query_map(params, |row| Ok(map_entry_row(row)))
                .map_err(storage_err("Audit query"))?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(storage_err("Audit row"))??);
            }
            Ok(entries)
        })
    }
}

impl AuditLog for SqliteAuditLog {
    fn append(&self, entry: &ExecutionAuditEntry) -> sesh_core::Result<()> {
        let details = serde_json::to_string(&entry.details)?;
        let modified = entry
            .modified_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO execution_audit (id, action_id, thread_id, plan_id, plan_step_id,
                                              action_type, risk_level, mode, user_approved,
                                              approval, success, error, result, details,
                                              modified_details, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                rusqlite::params![
                    entry.id.to_string(),
                    entry.action_id.to_string(),
                    entry.thread_id.as_str(),
                    entry.plan_id.map(|id| id.to_string()),
                    entry.plan_step_id.map(|id| id.to_string()),
                    entry.action_type.to_string(),
                    entry.risk_level.to_string(),
                    entry.mode.to_string(),
                    entry.user_approved,
                    entry.approval.to_string(),
                    entry.success,
                    entry.error,
                    entry.result,
                    details,
                    modified,
                    entry.timestamp.0,
                ],
            )
            .map_err(storage_err("Audit insert"))?;
            Ok(())
        })?;

        debug!(
            action_id = %entry.action_id,
            thread_id = %entry.thread_id,
            success = entry.success,
            "Audit entry stored"
        );
        Ok(())
    }

    fn by_thread(&self, thread_id: &ThreadId) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        let sql = format!("{} WHERE thread_id = ?1 ORDER BY seq ASC", SELECT_COLUMNS);
        self.query(&sql, &[&thread_id.as_str()])
    }

    fn by_plan(&self, plan_id: Uuid) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        let sql = format!("{} WHERE plan_id = ?1 ORDER BY seq ASC", SELECT_COLUMNS);
        self.query(&sql, &[&plan_id.to_string()])
    }

    fn in_range(&self, from: Timestamp, to: Timestamp) -> sesh_core::Result<Vec<ExecutionAuditEntry>> {
        let sql = format!(
            "{} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY seq ASC",
            SELECT_COLUMNS
        );
        self.query(&sql, &[&from.0, &to.0])
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, SeshError> {
    Uuid::parse_str(s).map_err(|e| SeshError::Storage(format!("Invalid UUID '{}': {}", s, e)))
}

fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T, SeshError> {
    s.parse().map_err(SeshError::Storage)
}

fn parse_json(s: &str) -> Result<serde_json::Value, SeshError> {
    Ok(serde_json::from_str(s)?)
}

fn map_entry_row(row: &Row<'_>) -> Result<ExecutionAuditEntry, SeshError> {
    let get_err = storage_err("Audit column");
    let text = |idx: usize| -> Result<String, SeshError> { row.get(idx).map_err(&get_err) };
    let opt_text = |idx: usize| -> Result<Option<String>, SeshError> { row.get(idx).map_err(&get_err) };

    Ok(ExecutionAuditEntry {
        id: parse_uuid(&text(0)?)?,
        action_id: parse_uuid(&text(1)?)?,
        thread_id: ThreadId::new(text(2)?),
        plan_id: opt_text(3)?.as_deref().map(parse_uuid).transpose()?,
        plan_step_id: opt_text(4)?.as_deref().map(parse_uuid).transpose()?,
        action_type: parse_enum(&text(5)?)?,
        risk_level: parse_enum(&text(6)?)?,
        mode: parse_enum(&text(7)?)?,
        user_approved: row.get(8).map_err(&get_err)?,
        approval: parse_enum(&text(9)?)?,
        success: row.get(10).map_err(&get_err)?,
        error: opt_text(11)?,
        result: opt_text(12)?,
        details: parse_json(&text(13)?)?,
        modified_details: opt_text(14)?.as_deref().map(parse_json).transpose()?,
        timestamp: Timestamp(row.get(15).map_err(&get_err)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesh_core::types::{ActionType, ApprovalSource, ExecutionMode, RiskLevel};

    fn log() -> SqliteAuditLog {
        SqliteAuditLog::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn entry(thread: &str, plan_id: Option<Uuid>, ts: i64) -> ExecutionAuditEntry {
        ExecutionAuditEntry {
            id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            thread_id: ThreadId::from(thread),
            plan_id,
            plan_step_id: plan_id.map(|_| Uuid::new_v4()),
            action_type: ActionType::TerminalCommand,
            risk_level: RiskLevel::Dangerous,
            mode: ExecutionMode::Assisted,
            user_approved: true,
            approval: ApprovalSource::User,
            success: false,
            error: Some("exit status 2".to_string()),
            result: None,
            details: serde_json::json!({"type": "terminal_command", "command": "make"}),
            modified_details: Some(
                serde_json::json!({"type": "terminal_command", "command": "make -j4"}),
            ),
            timestamp: Timestamp(ts),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let log = log();
        let e = entry("t1", Some(Uuid::new_v4()), 1_700_000_000);
        log.append(&e).unwrap();

        let got = log.by_thread(&ThreadId::from("t1")).unwrap();
        assert_eq!(got, vec![e]);
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn test_queries_filter_and_keep_order() {
        let log = log();
        let plan = Uuid::new_v4();
        let e1 = entry("t1", Some(plan), 300);
        let e2 = entry("t2", None, 100);
        let e3 = entry("t1", Some(plan), 200);
        for e in [&e1, &e2, &e3] {
            log.append(e).unwrap();
        }

        assert_eq!(
            log.by_thread(&ThreadId::from("t1")).unwrap(),
            vec![e1.clone(), e3.clone()]
        );
        assert_eq!(log.by_plan(plan).unwrap(), vec![e1.clone(), e3.clone()]);
        assert_eq!(
            log.in_range(Timestamp(100), Timestamp(200)).unwrap(),
            vec![e2.clone(), e3.clone()]
        );
        assert_eq!(log.recent(2).unwrap(), vec![e3, e2]);
    }

    #[test]
    fn test_recent_with_huge_limit_returns_everything() {
        let log = log();
        let e1 = entry("t1", None, 1);
        let e2 = entry("t1", None, 2);
        log.append(&e1).unwrap();
        log.append(&e2).unwrap();

        assert_eq!(log.recent(u64::MAX).unwrap(), vec![e2.clone(), e1]);
        assert_eq!(log.recent(1).unwrap(), vec![e2]);
        assert!(log.recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let log = log();
        let e = entry("t1", None, 1);
        log.append(&e).unwrap();
        let err = log.append(&e).unwrap_err();
        assert!(matches!(err, SeshError::Storage(_)));
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesh.db");
        let e = entry("t1", None, 42);
        {
            let log = SqliteAuditLog::new(Arc::new(Database::open(&path).unwrap()));
            log.append(&e).unwrap();
        }
        let log = SqliteAuditLog::new(Arc::new(Database::open(&path).unwrap()));
        assert_eq!(log.in_range(Timestamp(0), Timestamp(100)).unwrap(), vec![e]);
    }
}
