//! Plan files for `sesh run`.
//!
//! A plan file lists steps by number; dependencies refer to step numbers and
//! are turned into step ids while the plan is materialized.
//!
//! ```json
//! {
//!   "thread_id": "demo",
//!   "steps": [
//!     { "step_number": 1, "description": "Add module",
//!       "details": { "type": "file_create", "path": "src/a.rs", "content": "" } },
//!     { "step_number": 2, "description": "Build", "depends_on": [1],
//!       "details": { "type": "terminal_command", "command": "cargo build" } }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use sesh_action::{ActionDetails, Plan, PlanDraft, PlanError, PlanStep};
use sesh_core::types::{RiskLevel, ThreadId};

#[derive(Debug, thiserror::Error)]
pub enum PlanFileError {
    #[error("Failed to read plan file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid plan file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Step {step} depends on unknown step number {dependency}")]
    UnknownStepNumber { step: u32, dependency: u32 },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Debug, Deserialize)]
pub struct PlanFile {
    #[serde(default = "default_thread")]
    pub thread_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub steps: Vec<PlanFileStep>,
}

#[derive(Debug, Deserialize)]
pub struct PlanFileStep {
    pub step_number: u32,
    pub description: String,
    pub details: ActionDetails,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
}

fn default_thread() -> String {
    "default".to_string()
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self, PlanFileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Build a validated `pending` plan.
    pub fn into_plan(self) -> Result<Plan, PlanFileError> {
        let mut draft = PlanDraft::new(ThreadId::new(self.thread_id), self.message_id);
        let plan_id = draft.id();

        let ids: HashMap<u32, Uuid> = self
            .steps
            .iter()
            .map(|s| (s.step_number, Uuid::new_v4()))
            .collect();

        for entry in self.steps {
            let mut depends_on = Vec::with_capacity(entry.depends_on.len());
            for n in &entry.depends_on {
                let id = ids.get(n).ok_or(PlanFileError::UnknownStepNumber {
                    step: entry.step_number,
                    dependency: *n,
                })?;
                depends_on.push(*id);
            }

            let mut step = PlanStep::new(plan_id, entry.step_number, entry.description, entry.details)
                .with_depends_on(depends_on);
            if let Some(id) = ids.get(&entry.step_number) {
                step.id = *id;
            }
            if let Some(risk) = entry.risk_level {
                step = step.with_risk_level(risk);
            }
            draft.push_step(step);
        }

        Ok(draft.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesh_core::types::PlanStatus;

    fn parse(json: &str) -> PlanFile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_dependencies_resolved_by_step_number() {
        let file = parse(
            r#"{
                "thread_id": "demo",
                "steps": [
                    {"step_number": 2, "description": "build", "depends_on": [1],
                     "details": {"type": "terminal_command", "command": "cargo build"}},
                    {"step_number": 1, "description": "write",
                     "details": {"type": "file_create", "path": "a.rs", "content": ""},
                     "risk_level": "dangerous"}
                ]
            }"#,
        );
        let plan = file.into_plan().unwrap();
        assert_eq!(plan.status, PlanStatus::Pending);
        assert_eq!(plan.thread_id, ThreadId::from("demo"));
        assert_eq!(plan.total_steps, 2);

        let order = plan.execution_order().unwrap();
        let first = plan.step(order[0]).unwrap();
        let second = plan.step(order[1]).unwrap();
        assert_eq!(first.step_number, 1);
        assert_eq!(first.risk_level, Some(RiskLevel::Dangerous));
        assert!(second.depends_on.contains(&first.id));
    }

    #[test]
    fn test_unknown_dependency_number() {
        let file = parse(
            r#"{"steps": [
                {"step_number": 1, "description": "x", "depends_on": [7],
                 "details": {"type": "information", "message": "hi"}}
            ]}"#,
        );
        assert_eq!(file.thread_id, "default");
        let err = file.into_plan().unwrap_err();
        assert!(matches!(
            err,
            PlanFileError::UnknownStepNumber {
                step: 1,
                dependency: 7
            }
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let file = parse(
            r#"{"steps": [
                {"step_number": 1, "description": "a", "depends_on": [2],
                 "details": {"type": "information", "message": "a"}},
                {"step_number": 2, "description": "b", "depends_on": [1],
                 "details": {"type": "information", "message": "b"}}
            ]}"#,
        );
        let err = file.into_plan().unwrap_err();
        assert!(matches!(
            err,
            PlanFileError::Plan(PlanError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"steps": [{"step_number": 1, "description": "hello",
                "details": {"type": "information", "message": "hello"}}]}"#,
        )
        .unwrap();
        let plan = PlanFile::load(&path).unwrap().into_plan().unwrap();
        assert_eq!(plan.steps.len(), 1);

        assert!(matches!(
            PlanFile::load(&dir.path().join("missing.json")),
            Err(PlanFileError::Io(_))
        ));
    }
}
