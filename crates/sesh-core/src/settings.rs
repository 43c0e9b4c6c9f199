//! Process-wide policy settings and their copy-on-write store.
//!
//! Readers always take a whole `Arc` snapshot, so a policy decision never
//! observes a half-applied update. Writers replace the snapshot atomically.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ExecutionMode;

/// Execution policy knobs read by the confirmation policy on every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Mode for threads without an explicit override.
    pub default_mode: ExecutionMode,
    /// Confirm dangerous actions even in autonomous mode.
    pub always_confirm_dangerous: bool,
    /// Confirm git operations even in autonomous mode.
    pub always_confirm_git_operations: bool,
    /// Confirm file deletions even in autonomous mode.
    pub always_confirm_file_deletions: bool,
    /// Skip the rest of a batch after the first failed action.
    pub stop_on_error: bool,
    /// Maximum number of actions accepted in one submission.
    pub max_batch_size: usize,
    /// Upper bound for a single tool execution, in seconds.
    pub action_timeout_secs: u64,
    /// How long a confirmation request may stay unanswered. 0 waits forever.
    pub confirmation_timeout_secs: u64,
    /// Finished batches kept per thread for queries. Older ones are evicted
    /// together with their plan and actions.
    pub retained_batches: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_mode: ExecutionMode::Assisted,
            always_confirm_dangerous: true,
            always_confirm_git_operations: true,
            always_confirm_file_deletions: true,
            stop_on_error: true,
            max_batch_size: 50,
            action_timeout_secs: 300,
            confirmation_timeout_secs: 0,
            retained_batches: 100,
        }
    }
}

/// Global skill enablement defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSkillSettings {
    /// Skills enabled for every thread that does not use a custom config.
    pub default_enabled_skill_ids: BTreeSet<String>,
    /// Skills whose tools should always be confirmed by the user.
    ///
    /// Read by tool hosts through the skill store before a tool call. The
    /// execution engine's confirmation policy only looks at
    /// `ExecutionSettings`.
    pub require_confirmation_skill_ids: BTreeSet<String>,
}

impl Default for GlobalSkillSettings {
    fn default() -> Self {
        Self {
            default_enabled_skill_ids: ["file_read", "code_search", "git_read"]
                .into_iter()
                .map(String::from)
                .collect(),
            require_confirmation_skill_ids: ["file_delete", "git_remote", "terminal"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Single-writer, many-reader holder of the current `ExecutionSettings`.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<ExecutionSettings>>,
}

impl SettingsStore {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Latest consistent snapshot.
    pub fn execution(&self) -> Arc<ExecutionSettings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot. In-flight readers keep the one they hold.
    pub fn update(&self, settings: ExecutionSettings) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(settings);
        info!(
            default_mode = %guard.default_mode,
            stop_on_error = guard.stop_on_error,
            "Execution settings updated"
        );
    }

    /// Apply a change to a copy of the current snapshot and publish it.
    pub fn modify<F>(&self, f: F) -> Arc<ExecutionSettings>
    where
        F: FnOnce(&mut ExecutionSettings),
    {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = ExecutionSettings::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
        Arc::clone(&guard)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(ExecutionSettings::default())
    }
}
