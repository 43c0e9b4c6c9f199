//! SQLite connection handling.
//!
//! One connection behind a `Mutex`, opened in WAL mode with migrations
//! applied before the handle is returned.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use sesh_core::error::SeshError;

use crate::migrations;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Map a rusqlite error into a storage error with context.
pub(crate) fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> SeshError + '_ {
    move |e| SeshError::Storage(format!("{}: {}", context, e))
}

/// Thread-safe handle to the Sesh database.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories as
    /// needed, and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self, SeshError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        let db = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, SeshError> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("Failed to open in-memory database"))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, SeshError> {
        conn.execute_batch(PRAGMAS)
            .map_err(storage_err("Failed to set pragmas"))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// File backing the database. `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, SeshError>
    where
        F: FnOnce(&Connection) -> Result<T, SeshError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SeshError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Highest applied migration.
    pub fn schema_version(&self) -> Result<i64, SeshError> {
        self.with_conn(migrations::current_version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}
