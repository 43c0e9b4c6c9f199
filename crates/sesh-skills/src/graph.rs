//! Skill dependency graph.
//!
//! Built once from the catalog into an explicit adjacency map. All closure
//! computations are iterative with visited sets, so a malformed graph can
//! never loop forever even though cycles are rejected at load time.

use std::collections::{BTreeSet, HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use sesh_core::settings::GlobalSkillSettings;

use crate::catalog::builtin_skills;
use crate::error::SkillError;
use crate::skill::{Skill, SkillId};
use crate::store::ThreadSkillConfig;

const SKILL_ID_PATTERN: &str = r"^[a-z][a-z0-9_]*$";

/// Immutable registry of skills plus forward and reverse dependency edges.
#[derive(Debug, Clone)]
pub struct SkillGraph {
    skills: Vec<Skill>,
    index: HashMap<SkillId, usize>,
    dependencies: HashMap<SkillId, BTreeSet<SkillId>>,
    dependents: HashMap<SkillId, BTreeSet<SkillId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl SkillGraph {
    /// Build and validate the graph.
    ///
    /// Fails on malformed ids, duplicate ids, dependencies on unknown skills,
    /// and dependency cycles.
    pub fn new(skills: Vec<Skill>) -> Result<Self, SkillError> {
        let id_pattern =
            Regex::new(SKILL_ID_PATTERN).map_err(|e| SkillError::InvalidSkillId(e.to_string()))?;

        let mut index = HashMap::with_capacity(skills.len());
        for (pos, skill) in skills.iter().enumerate() {
            if !id_pattern.is_match(&skill.id) {
                return Err(SkillError::InvalidSkillId(skill.id.clone()));
            }
            if index.insert(skill.id.clone(), pos).is_some() {
                return Err(SkillError::DuplicateSkill(skill.id.clone()));
            }
        }

        let mut dependencies = HashMap::with_capacity(skills.len());
        let mut dependents: HashMap<SkillId, BTreeSet<SkillId>> = skills
            .iter()
            .map(|s| (s.id.clone(), BTreeSet::new()))
            .collect();

        for skill in &skills {
            for dep in &skill.dependencies {
                if !index.contains_key(dep) {
                    return Err(SkillError::UnknownDependency {
                        skill: skill.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if let Some(reverse) = dependents.get_mut(dep) {
                    reverse.insert(skill.id.clone());
                }
            }
            dependencies.insert(skill.id.clone(), skill.dependencies.clone());
        }

        let graph = Self {
            skills,
            index,
            dependencies,
            dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(SkillError::CyclicDependency(cycle));
        }

        debug!(skills = graph.skills.len(), "Skill graph built");
        Ok(graph)
    }

    /// Graph over the built-in catalog.
    pub fn builtin() -> Result<Self, SkillError> {
        Self::new(builtin_skills())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.index.get(id).map(|&pos| &self.skills[pos])
    }

    /// Skills in catalog order.
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// The skill exposing `tool`, if any.
    pub fn skill_for_tool(&self, tool: &str) -> Option<&Skill> {
        self.skills
            .iter()
            .find(|s| s.tools.iter().any(|t| t == tool))
    }

    /// Every skill reachable from `id` via dependency edges, excluding `id`.
    pub fn dependency_closure(&self, id: &str) -> Result<BTreeSet<SkillId>, SkillError> {
        self.closure(id, &self.dependencies)
    }

    /// Every skill that depends on `id`, directly or transitively, excluding `id`.
    pub fn dependents_closure(&self, id: &str) -> Result<BTreeSet<SkillId>, SkillError> {
        self.closure(id, &self.dependents)
    }

    fn closure(
        &self,
        id: &str,
        edges: &HashMap<SkillId, BTreeSet<SkillId>>,
    ) -> Result<BTreeSet<SkillId>, SkillError> {
        if !self.contains(id) {
            return Err(SkillError::UnknownSkill(id.to_string()));
        }

        let mut visited: BTreeSet<SkillId> = BTreeSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            let Some(next) = edges.get(current) else {
                continue;
            };
            for neighbour in next {
                if neighbour != id && visited.insert(neighbour.clone()) {
                    stack.push(neighbour.as_str());
                }
            }
        }
        Ok(visited)
    }

    /// Iterative three-colour DFS. Returns the offending path, first node
    /// repeated at the end.
    fn find_cycle(&self) -> Option<Vec<SkillId>> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.skills.len());

        for root in &self.skills {
            if marks.contains_key(root.id.as_str()) {
                continue;
            }
            marks.insert(root.id.as_str(), Mark::OnStack);
            let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];

            while let Some(&(node, next)) = stack.last() {
                let dep = self
                    .dependencies
                    .get(node)
                    .and_then(|deps| deps.iter().nth(next))
                    .map(String::as_str);

                let Some(dep) = dep else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };

                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match marks.get(dep) {
                    Some(Mark::OnStack) => {
                        let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<SkillId> =
                            stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                        path.push(dep.to_string());
                        return Some(path);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep, Mark::OnStack);
                        stack.push((dep, 0));
                    }
                }
            }
        }
        None
    }

    /// Effective enabled set of a thread.
    ///
    /// A thread that does not use a custom config always resolves to the
    /// *current* global default, ignoring whatever it stored.
    pub fn resolve_effective_enabled(
        &self,
        config: &ThreadSkillConfig,
        global: &GlobalSkillSettings,
    ) -> BTreeSet<SkillId> {
        let source = if config.use_custom_config {
            &config.enabled_skill_ids
        } else {
            &global.default_enabled_skill_ids
        };
        source.iter().filter(|id| self.contains(id)).cloned().collect()
    }

    /// Flip one skill on or off for a thread, cascading through dependencies.
    ///
    /// Enabling adds the skill and its full dependency closure. Disabling
    /// removes the skill and every enabled skill that transitively depends on
    /// it. The result always uses a custom config. Unknown ids fail without
    /// touching the input.
    pub fn toggle(
        &self,
        config: &ThreadSkillConfig,
        skill_id: &str,
        global: &GlobalSkillSettings,
    ) -> Result<ThreadSkillConfig, SkillError> {
        if !self.contains(skill_id) {
            return Err(SkillError::UnknownSkill(skill_id.to_string()));
        }

        let mut enabled = self.resolve_effective_enabled(config, global);

        if enabled.contains(skill_id) {
            let cascade = self.dependents_closure(skill_id)?;
            enabled.remove(skill_id);
            let removed: Vec<&SkillId> = cascade.iter().filter(|d| enabled.contains(*d)).collect();
            debug!(skill = skill_id, cascade = ?removed, "Disabling skill");
            for dependent in &cascade {
                enabled.remove(dependent);
            }
        } else {
            let closure = self.dependency_closure(skill_id)?;
            debug!(skill = skill_id, dependencies = ?closure, "Enabling skill");
            enabled.insert(skill_id.to_string());
            enabled.extend(closure);
        }

        Ok(ThreadSkillConfig {
            thread_id: config.thread_id.clone(),
            enabled_skill_ids: enabled,
            use_custom_config: true,
        })
    }

    /// Tools exposed by a set of skills, de-duplicated in first-seen order
    /// (skills visited in catalog order).
    pub fn tools_for(&self, enabled: &BTreeSet<SkillId>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for skill in self.skills.iter().filter(|s| enabled.contains(&s.id)) {
            for tool in &skill.tools {
                if seen.insert(tool.as_str()) {
                    tools.push(tool.clone());
                }
            }
        }
        tools
    }

    /// Expand a set of ids with all their dependencies. Unknown ids fail.
    pub fn close_under_dependencies(
        &self,
        ids: &BTreeSet<SkillId>,
    ) -> Result<BTreeSet<SkillId>, SkillError> {
        let mut closed = ids.clone();
        for id in ids {
            closed.extend(self.dependency_closure(id)?);
        }
        Ok(closed)
    }
}
