//! Global and per-thread skill enablement.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use sesh_core::settings::GlobalSkillSettings;
use sesh_core::types::ThreadId;

use crate::error::SkillError;
use crate::graph::SkillGraph;
use crate::skill::{Skill, SkillId};

/// Per-thread skill enablement.
///
/// While `use_custom_config` is false the stored ids are ignored and the
/// thread follows the live global default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSkillConfig {
    pub thread_id: ThreadId,
    pub enabled_skill_ids: BTreeSet<SkillId>,
    pub use_custom_config: bool,
}

impl ThreadSkillConfig {
    /// A thread that inherits the global defaults.
    pub fn inherited(thread_id: ThreadId, defaults: &BTreeSet<SkillId>) -> Self {
        Self {
            thread_id,
            enabled_skill_ids: defaults.clone(),
            use_custom_config: false,
        }
    }
}

/// Owns the skill graph, the global defaults and every thread's overrides.
pub struct SkillConfigStore {
    graph: Arc<SkillGraph>,
    global: RwLock<Arc<GlobalSkillSettings>>,
    threads: RwLock<HashMap<ThreadId, ThreadSkillConfig>>,
}

impl SkillConfigStore {
    /// Create a store. The global settings are validated and closed under
    /// dependencies first.
    pub fn new(graph: Arc<SkillGraph>, global: GlobalSkillSettings) -> Result<Self, SkillError> {
        let global = Self::validate_global(&graph, global)?;
        Ok(Self {
            graph,
            global: RwLock::new(Arc::new(global)),
            threads: RwLock::new(HashMap::new()),
        })
    }

    pub fn graph(&self) -> &SkillGraph {
        &self.graph
    }

    /// Current global snapshot.
    pub fn global(&self) -> Arc<GlobalSkillSettings> {
        let guard = self.global.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the global settings.
    ///
    /// Unknown skill ids are rejected with nothing changed. The default
    /// enabled set is widened to its dependency closure. Inheriting threads
    /// observe the new defaults on their next read.
    pub fn update_global(&self, settings: GlobalSkillSettings) -> Result<(), SkillError> {
        let settings = Self::validate_global(&self.graph, settings)?;
        let mut guard = self.global.write().unwrap_or_else(|e| e.into_inner());
        info!(
            default_enabled = ?settings.default_enabled_skill_ids,
            require_confirmation = ?settings.require_confirmation_skill_ids,
            "Global skill settings updated"
        );
        *guard = Arc::new(settings);
        Ok(())
    }

    fn validate_global(
        graph: &SkillGraph,
        mut settings: GlobalSkillSettings,
    ) -> Result<GlobalSkillSettings, SkillError> {
        if let Some(unknown) = settings
            .require_confirmation_skill_ids
            .iter()
            .find(|id| !graph.contains(id))
        {
            return Err(SkillError::UnknownSkill(unknown.clone()));
        }
        settings.default_enabled_skill_ids =
            graph.close_under_dependencies(&settings.default_enabled_skill_ids)?;
        Ok(settings)
    }

    /// Stored config for a thread, or an inheriting one if the thread was
    /// never customized.
    pub fn thread_config(&self, thread_id: &ThreadId) -> ThreadSkillConfig {
        let threads = self.threads.read().unwrap_or_else(|e| e.into_inner());
        match threads.get(thread_id) {
            Some(config) => config.clone(),
            None => ThreadSkillConfig::inherited(
                thread_id.clone(),
                &self.global().default_enabled_skill_ids,
            ),
        }
    }

    /// Effective enabled set, resolved against the live global default.
    pub fn effective_enabled(&self, thread_id: &ThreadId) -> BTreeSet<SkillId> {
        let config = self.thread_config(thread_id);
        self.graph.resolve_effective_enabled(&config, &self.global())
    }

    pub fn is_enabled(&self, thread_id: &ThreadId, skill_id: &str) -> bool {
        self.effective_enabled(thread_id).contains(skill_id)
    }

    /// Tool names available to a thread.
    pub fn tools_for_thread(&self, thread_id: &ThreadId) -> Vec<String> {
        self.graph.tools_for(&self.effective_enabled(thread_id))
    }

    /// Toggle a skill for a thread and return the new config.
    pub fn toggle_for_thread(
        &self,
        thread_id: &ThreadId,
        skill_id: &str,
    ) -> Result<ThreadSkillConfig, SkillError> {
        let global = self.global();
        let mut threads = self.threads.write().unwrap_or_else(|e| e.into_inner());
        let current = threads.get(thread_id).cloned().unwrap_or_else(|| {
            ThreadSkillConfig::inherited(thread_id.clone(), &global.default_enabled_skill_ids)
        });

        let next = self.graph.toggle(&current, skill_id, &global)?;
        info!(
            thread_id = %thread_id,
            skill = skill_id,
            enabled = ?next.enabled_skill_ids,
            "Thread skills toggled"
        );
        threads.insert(thread_id.clone(), next.clone());
        Ok(next)
    }

    /// Switch a thread between custom and inherited enablement.
    ///
    /// Turning custom config on freezes the current default into the
    /// thread's own set. Turning it off discards overrides and resets the
    /// stored set to the default at this moment.
    pub fn set_use_custom_config(
        &self,
        thread_id: &ThreadId,
        use_custom: bool,
    ) -> ThreadSkillConfig {
        let global = self.global();
        let mut threads = self.threads.write().unwrap_or_else(|e| e.into_inner());

        let next = if use_custom {
            let enabled = match threads.get(thread_id) {
                Some(existing) if existing.use_custom_config => existing.enabled_skill_ids.clone(),
                _ => global.default_enabled_skill_ids.clone(),
            };
            ThreadSkillConfig {
                thread_id: thread_id.clone(),
                enabled_skill_ids: enabled,
                use_custom_config: true,
            }
        } else {
            ThreadSkillConfig::inherited(thread_id.clone(), &global.default_enabled_skill_ids)
        };

        threads.insert(thread_id.clone(), next.clone());
        next
    }

    /// Whether a skill is globally marked as always needing confirmation.
    pub fn requires_confirmation(&self, skill_id: &str) -> bool {
        self.global()
            .require_confirmation_skill_ids
            .contains(skill_id)
    }

    pub fn skill_for_tool(&self, tool: &str) -> Option<&Skill> {
        self.graph.skill_for_tool(tool)
    }

    /// Whether a call to `tool` must be confirmed, judged by the skill that
    /// provides it. Unknown tools are not gated here.
    pub fn tool_requires_confirmation(&self, tool: &str) -> bool {
        self.skill_for_tool(tool)
            .is_some_and(|skill| self.requires_confirmation(&skill.id))
    }
}
