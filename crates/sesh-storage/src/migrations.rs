//! Database schema migrations.
//!
//! Version 1 creates the append-only `execution_audit` table. Updates and
//! deletes on it are refused by triggers.

use rusqlite::Connection;
use tracing::info;

use sesh_core::error::SeshError;

use crate::db::storage_err;

pub const LATEST_VERSION: i64 = 1;

/// Apply every migration newer than the recorded schema version.
pub fn run_migrations(conn: &Connection) -> Result<(), SeshError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(storage_err("Failed to create migrations table"))?;

    if current_version(conn)? < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: execution_audit");
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64, SeshError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(storage_err("Failed to query migration version"))
}

/// Version 1: audit trail of executed actions.
fn apply_v1(conn: &Connection) -> Result<(), SeshError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS execution_audit (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            action_id           TEXT NOT NULL,
            thread_id           TEXT NOT NULL,
            plan_id             TEXT,
            plan_step_id        TEXT,
            action_type         TEXT NOT NULL
                                CHECK (action_type IN ('file_edit', 'file_create', 'file_delete',
                                                       'terminal_command', 'git_operation',
                                                       'information')),
            risk_level          TEXT NOT NULL
                                CHECK (risk_level IN ('safe', 'moderate', 'dangerous')),
            mode                TEXT NOT NULL
                                CHECK (mode IN ('assisted', 'autonomous')),
            user_approved       INTEGER NOT NULL,
            approval            TEXT NOT NULL
                                CHECK (approval IN ('policy', 'user', 'step')),
            success             INTEGER NOT NULL,
            error               TEXT,
            result              TEXT,
            details             TEXT NOT NULL,
            modified_details    TEXT,
            timestamp           INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_execution_audit_thread
            ON execution_audit (thread_id, seq);

        CREATE INDEX IF NOT EXISTS idx_execution_audit_plan
            ON execution_audit (plan_id, seq)
            WHERE plan_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_execution_audit_timestamp
            ON execution_audit (timestamp);

        CREATE TRIGGER IF NOT EXISTS execution_audit_no_update
            BEFORE UPDATE ON execution_audit
            BEGIN
                SELECT RAISE(ABORT, 'execution_audit is append-only');
            END;

        CREATE TRIGGER IF NOT EXISTS execution_audit_no_delete
            BEFORE DELETE ON execution_audit
            BEGIN
                SELECT RAISE(ABORT, 'execution_audit is append-only');
            END;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'execution_audit');
        ",
    )
    .map_err(storage_err("Failed to apply migration v1"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn insert_row(conn: &Connection, id: &str, action_type: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO execution_audit (id, action_id, thread_id, action_type, risk_level,
                                          mode, user_approved, approval, success, details,
                                          timestamp)
             VALUES (?1, 'a-1', 't-1', ?2, 'safe', 'assisted', 1, 'user', 1, '{}', 1700000000)",
            rusqlite::params![id, action_type],
        )
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = migrated();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn test_audit_rows_cannot_change() {
        let conn = migrated();
        insert_row(&conn, "e-1", "information").unwrap();

        let update = conn.execute("UPDATE execution_audit SET success = 0", []);
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM execution_audit", []);
        assert!(delete.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM execution_audit", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_action_type_check() {
        let conn = migrated();
        assert!(insert_row(&conn, "e-1", "shell").is_err());
    }

    #[test]
    fn test_entry_id_unique() {
        let conn = migrated();
        insert_row(&conn, "e-1", "file_edit").unwrap();
        assert!(insert_row(&conn, "e-1", "file_edit").is_err());
    }
}
