//! Error types for the skill registry.

/// Errors from skill graph construction and enablement changes.
///
/// All of these are reported before any state is modified.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Unknown skill: {0}")]
    UnknownSkill(String),
    #[error("Duplicate skill id: {0}")]
    DuplicateSkill(String),
    #[error("Invalid skill id: {0}")]
    InvalidSkillId(String),
    #[error("Skill {skill} depends on unknown skill {dependency}")]
    UnknownDependency { skill: String, dependency: String },
    #[error("Cyclic skill dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_error_display() {
        let err = SkillError::UnknownSkill("teleport".to_string());
        assert_eq!(err.to_string(), "Unknown skill: teleport");

        let err = SkillError::UnknownDependency {
            skill: "file_write".to_string(),
            dependency: "file_raed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Skill file_write depends on unknown skill file_raed"
        );
    }

    #[test]
    fn test_cyclic_dependency_shows_path() {
        let err = SkillError::CyclicDependency(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "Cyclic skill dependency: a -> b -> a");
    }
}
