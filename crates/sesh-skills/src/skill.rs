//! Skill definitions.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use sesh_core::types::RiskLevel;

/// Stable identifier of a skill, e.g. `file_write`.
pub type SkillId = String;

/// Fixed set of skill categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    FileSystem,
    Search,
    Git,
    Terminal,
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkillCategory::FileSystem => write!(f, "file_system"),
            SkillCategory::Search => write!(f, "search"),
            SkillCategory::Git => write!(f, "git"),
            SkillCategory::Terminal => write!(f, "terminal"),
        }
    }
}

/// A named capability bundle with a declared risk level and tool set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: SkillId,
    pub name: String,
    pub description: String,
    pub category: SkillCategory,
    pub risk_level: RiskLevel,
    /// Tool names exposed when the skill is enabled, in display order.
    pub tools: Vec<String>,
    /// Skills that must be enabled whenever this one is.
    pub dependencies: BTreeSet<SkillId>,
}

impl Skill {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: SkillCategory,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            risk_level,
            tools: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tool in tools {
            let tool = tool.into();
            if !self.tools.contains(&tool) {
                self.tools.push(tool);
            }
        }
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_dedups_tools() {
        let skill = Skill::new("file_read", "Read files", SkillCategory::FileSystem, RiskLevel::Safe)
            .with_tools(["read_file", "list_directory", "read_file"]);
        assert_eq!(skill.tools, vec!["read_file", "list_directory"]);
    }

    #[test]
    fn test_builder_collects_dependencies() {
        let skill = Skill::new(
            "file_write",
            "Write files",
            SkillCategory::FileSystem,
            RiskLevel::Moderate,
        )
        .with_dependencies(["file_read"]);
        assert!(skill.dependencies.contains("file_read"));
        assert_eq!(skill.dependencies.len(), 1);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(SkillCategory::FileSystem.to_string(), "file_system");
        assert_eq!(SkillCategory::Terminal.to_string(), "terminal");
        let json = serde_json::to_string(&SkillCategory::Git).unwrap();
        assert_eq!(json, "\"git\"");
    }
}
