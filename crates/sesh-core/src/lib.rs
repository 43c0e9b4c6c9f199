pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod settings;
pub mod types;

pub use audit::{AuditLog, ExecutionAuditEntry};
pub use config::SeshConfig;
pub use error::{Result, SeshError};
pub use events::DomainEvent;
pub use settings::{ExecutionSettings, GlobalSkillSettings, SettingsStore};
pub use types::*;
