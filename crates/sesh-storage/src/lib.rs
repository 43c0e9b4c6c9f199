//! Sesh storage crate - SQLite persistence for the execution audit trail.
//!
//! Provides a WAL-mode SQLite database with migrations and an append-only
//! `AuditLog` implementation.

pub mod audit;
pub mod db;
pub mod migrations;

pub use audit::SqliteAuditLog;
pub use db::Database;
