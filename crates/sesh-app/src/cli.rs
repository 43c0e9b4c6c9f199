//! CLI argument definitions for the Sesh binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use sesh_core::types::ExecutionMode;

/// Sesh - plan execution with skill gating, confirmations and an audit trail.
#[derive(Parser, Debug)]
#[command(name = "sesh", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the audit database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the skill catalog and the tools enabled for a thread.
    Skills {
        /// Thread to resolve enablement for.
        #[arg(short = 't', long = "thread", default_value = "default")]
        thread: String,

        /// Toggle a skill for the thread before printing. Repeatable.
        #[arg(long = "toggle")]
        toggle: Vec<String>,
    },

    /// Execute a plan file against the dry-run executor.
    Run {
        /// Plan file (JSON).
        plan: PathBuf,

        /// Execution mode for the plan's thread. Defaults to the configured mode.
        #[arg(short = 'm', long = "mode", value_enum)]
        mode: Option<ModeArg>,

        /// Approve every confirmation request without prompting.
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Query the audit log.
    Audit {
        /// Only entries of this thread.
        #[arg(short = 't', long = "thread", conflicts_with = "plan")]
        thread: Option<String>,

        /// Only entries of this plan.
        #[arg(short = 'p', long = "plan")]
        plan: Option<uuid::Uuid>,

        /// Maximum number of recent entries when no filter is given.
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: u64,
    },

    /// Print the effective configuration.
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Assisted,
    Autonomous,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Assisted => ExecutionMode::Assisted,
            ModeArg::Autonomous => ExecutionMode::Autonomous,
        }
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SESH_CONFIG env var > ~/.sesh/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SESH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory, expanding a leading `~`.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => expand_home(config_data_dir),
        }
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".sesh").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
