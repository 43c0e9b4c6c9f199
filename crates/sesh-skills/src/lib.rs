//! Skill registry for Sesh.
//!
//! Holds the static catalog of skills, their dependency graph, and the
//! per-thread enablement state layered on top of the global defaults.

pub mod catalog;
pub mod error;
pub mod graph;
pub mod skill;
pub mod store;

pub use catalog::builtin_skills;
pub use error::SkillError;
pub use graph::SkillGraph;
pub use skill::{Skill, SkillCategory, SkillId};
pub use store::{SkillConfigStore, ThreadSkillConfig};
