//! Plan lifecycle.
//!
//! A plan is built as a `PlanDraft` (status `generating`) and only becomes a
//! `pending` `Plan` once `finish` has validated its step graph. Plans own their
//! steps; counters are recomputed from step statuses after every transition.

pub mod state_machine;

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sesh_core::types::{PlanStatus, RiskLevel, SkipReason, StepStatus, ThreadId, Timestamp};
use uuid::Uuid;

use crate::error::{PlanError, TransitionError};
use crate::plan::state_machine::{validate_plan_transition, validate_step_transition};
use crate::types::ActionDetails;

/// One step of a plan. Maps to exactly one action once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub step_number: u32,
    pub description: String,
    pub details: ActionDetails,
    pub status: StepStatus,
    pub depends_on: BTreeSet<Uuid>,
    /// Risk declared by the plan author. Can raise the classified risk.
    pub risk_level: Option<RiskLevel>,
    pub note: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<String>,
    pub result: Option<String>,
}

impl PlanStep {
    pub fn new(
        plan_id: Uuid,
        step_number: u32,
        description: impl Into<String>,
        details: ActionDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            step_number,
            description: description.into(),
            details,
            status: StepStatus::Pending,
            depends_on: BTreeSet::new(),
            risk_level: None,
            note: None,
            skip_reason: None,
            error: None,
            result: None,
        }
    }

    pub fn with_depends_on(mut self, steps: impl IntoIterator<Item = Uuid>) -> Self {
        self.depends_on.extend(steps);
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }
}

/// An ordered, dependency-annotated list of steps with an approval and
/// execution lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub thread_id: ThreadId,
    pub message_id: Option<String>,
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub rejected_steps: usize,
    pub skipped_steps: usize,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Plan {
    pub fn step(&self, step_id: Uuid) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: Uuid) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// Recompute every counter from step statuses.
    pub fn recount(&mut self) {
        self.total_steps = self.steps.len();
        self.completed_steps = self.count(StepStatus::Completed);
        self.failed_steps = self.count(StepStatus::Error);
        self.rejected_steps = self.count(StepStatus::Rejected);
        self.skipped_steps = self.count(StepStatus::Skipped);
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Steps that are pending, approved or in progress.
    pub fn open_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.status.is_terminal()).count()
    }

    /// Whether the counters add up to the number of steps.
    pub fn counters_balance(&self) -> bool {
        self.completed_steps
            + self.failed_steps
            + self.rejected_steps
            + self.skipped_steps
            + self.open_steps()
            == self.total_steps
    }

    pub fn all_steps_settled(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Final status for a plan whose steps have all settled.
    ///
    /// Completed when every step that was not cancelled completed. A failure,
    /// a rejection, or a skip caused by either makes the plan partial.
    pub fn outcome(&self) -> PlanStatus {
        let degraded_skip = self.steps.iter().any(|s| {
            s.status == StepStatus::Skipped && !s.skip_reason.is_some_and(|r| r.is_cancellation())
        });
        if self.failed_steps + self.rejected_steps > 0 || degraded_skip {
            PlanStatus::Partial
        } else {
            PlanStatus::Completed
        }
    }

    /// Move the plan to `to`, validating the transition.
    pub fn transition(&mut self, to: PlanStatus) -> Result<(), TransitionError> {
        validate_plan_transition(self.status, to)?;
        self.status = to;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Move one step to `to`, validating the transition and recounting.
    pub fn transition_step(&mut self, step_id: Uuid, to: StepStatus) -> Result<(), PlanError> {
        let step = self.step_mut(step_id).ok_or(PlanError::UnknownStep(step_id))?;
        validate_step_transition(step.status, to)?;
        step.status = to;
        self.updated_at = Timestamp::now();
        self.recount();
        Ok(())
    }

    /// Check step ids, numbers, ownership and the dependency graph.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids = HashSet::with_capacity(self.steps.len());
        let mut numbers = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !ids.insert(step.id) {
                return Err(PlanError::DuplicateStep(step.id));
            }
            if !numbers.insert(step.step_number) {
                return Err(PlanError::DuplicateStepNumber(step.step_number));
            }
            if step.plan_id != self.id {
                return Err(PlanError::ForeignStep {
                    step: step.id,
                    owner: step.plan_id,
                });
            }
        }
        for step in &self.steps {
            if let Some(dep) = step.depends_on.iter().find(|d| !ids.contains(*d)) {
                return Err(PlanError::UnknownDependency {
                    step: step.id,
                    dependency: *dep,
                });
            }
        }
        self.execution_order().map(|_| ())
    }

    /// Topological step order, lowest `step_number` first among ready steps.
    pub fn execution_order(&self) -> Result<Vec<Uuid>, PlanError> {
        let numbers: HashMap<Uuid, u32> =
            self.steps.iter().map(|s| (s.id, s.step_number)).collect();
        let mut in_degree: HashMap<Uuid, usize> = HashMap::with_capacity(self.steps.len());
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for step in &self.steps {
            in_degree.insert(step.id, step.depends_on.len());
            for dep in &step.depends_on {
                dependents.entry(*dep).or_default().push(step.id);
            }
        }

        let mut ready: BinaryHeap<Reverse<(u32, Uuid)>> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| Reverse((s.step_number, s.id)))
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for next in dependents.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        let number = numbers.get(next).copied().unwrap_or(u32::MAX);
                        ready.push(Reverse((number, *next)));
                    }
                }
            }
        }

        if order.len() < self.steps.len() {
            let stuck = self
                .steps
                .iter()
                .filter(|s| !order.contains(&s.id))
                .min_by_key(|s| s.step_number)
                .map(|s| s.id)
                .unwrap_or_else(Uuid::nil);
            return Err(PlanError::CyclicDependency(stuck));
        }
        Ok(order)
    }
}

/// A plan still being generated.
///
/// Only `finish` produces a `pending` plan. Dropping the draft, or a failed
/// `finish`, leaves nothing behind.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    plan: Plan,
}

impl PlanDraft {
    pub fn new(thread_id: ThreadId, message_id: Option<String>) -> Self {
        let now = Timestamp::now();
        Self {
            plan: Plan {
                id: Uuid::new_v4(),
                thread_id,
                message_id,
                status: PlanStatus::Generating,
                steps: Vec::new(),
                total_steps: 0,
                completed_steps: 0,
                failed_steps: 0,
                rejected_steps: 0,
                skipped_steps: 0,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.plan.id
    }

    pub fn status(&self) -> PlanStatus {
        self.plan.status
    }

    /// Append a step with no dependencies. Returns its id.
    pub fn add_step(
        &mut self,
        step_number: u32,
        description: impl Into<String>,
        details: ActionDetails,
    ) -> Uuid {
        self.add_step_after(step_number, description, details, &[])
    }

    /// Append a step that depends on earlier steps. Returns its id.
    pub fn add_step_after(
        &mut self,
        step_number: u32,
        description: impl Into<String>,
        details: ActionDetails,
        depends_on: &[Uuid],
    ) -> Uuid {
        let step = PlanStep::new(self.plan.id, step_number, description, details)
            .with_depends_on(depends_on.iter().copied());
        let id = step.id;
        self.plan.steps.push(step);
        id
    }

    /// Append a fully built step.
    pub fn push_step(&mut self, step: PlanStep) {
        self.plan.steps.push(step);
    }

    /// Validate the step graph and materialize a `pending` plan.
    pub fn finish(mut self) -> Result<Plan, PlanError> {
        self.plan.validate()?;
        self.plan.transition(PlanStatus::Pending)?;
        self.plan.recount();
        Ok(self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(msg: &str) -> ActionDetails {
        ActionDetails::Information {
            message: msg.to_string(),
        }
    }

    fn draft() -> PlanDraft {
        PlanDraft::new(ThreadId::from("t1"), Some("msg-1".to_string()))
    }

    // =====================================================================
    // Draft materialization
    // =====================================================================

    #[test]
    fn test_finish_yields_pending_plan() {
        let mut d = draft();
        assert_eq!(d.status(), PlanStatus::Generating);
        let a = d.add_step(1, "one", info("a"));
        d.add_step_after(2, "two", info("b"), &[a]);

        let plan = d.finish().unwrap();
        assert_eq!(plan.status, PlanStatus::Pending);
        assert_eq!(plan.total_steps, 2);
        assert!(plan.counters_balance());
    }

    #[test]
    fn test_finish_rejects_duplicate_step_numbers() {
        let mut d = draft();
        d.add_step(1, "one", info("a"));
        d.add_step(1, "again", info("b"));
        assert_eq!(d.finish().unwrap_err(), PlanError::DuplicateStepNumber(1));
    }

    #[test]
    fn test_finish_rejects_unknown_dependency() {
        let mut d = draft();
        let ghost = Uuid::new_v4();
        let a = d.add_step_after(1, "one", info("a"), &[ghost]);
        assert_eq!(
            d.finish().unwrap_err(),
            PlanError::UnknownDependency {
                step: a,
                dependency: ghost
            }
        );
    }

    #[test]
    fn test_finish_rejects_cycle() {
        let mut d = draft();
        let plan_id = d.id();
        let a = PlanStep::new(plan_id, 1, "a", info("a"));
        let b = PlanStep::new(plan_id, 2, "b", info("b")).with_depends_on([a.id]);
        let a = a.with_depends_on([b.id]);
        d.push_step(a);
        d.push_step(b);
        assert!(matches!(
            d.finish().unwrap_err(),
            PlanError::CyclicDependency(_)
        ));
    }

    #[test]
    fn test_finish_rejects_foreign_step() {
        let mut d = draft();
        let other_plan = Uuid::new_v4();
        d.push_step(PlanStep::new(other_plan, 1, "x", info("x")));
        assert!(matches!(
            d.finish().unwrap_err(),
            PlanError::ForeignStep { owner, .. } if owner == other_plan
        ));
    }

    #[test]
    fn test_empty_draft_finishes() {
        let plan = draft().finish().unwrap();
        assert_eq!(plan.total_steps, 0);
        assert_eq!(plan.outcome(), PlanStatus::Completed);
    }

    // =====================================================================
    // Ordering
    // =====================================================================

    #[test]
    fn test_execution_order_uses_step_number_tiebreak() {
        let mut d = draft();
        let s3 = d.add_step(3, "three", info("3"));
        let s1 = d.add_step(1, "one", info("1"));
        let s2 = d.add_step_after(2, "two", info("2"), &[s3]);
        let plan = d.finish().unwrap();

        // s2 waits for s3 even though its number is lower.
        assert_eq!(plan.execution_order().unwrap(), vec![s1, s3, s2]);
    }

    #[test]
    fn test_execution_order_diamond() {
        let mut d = draft();
        let root = d.add_step(1, "root", info("r"));
        let right = d.add_step_after(3, "right", info("r"), &[root]);
        let left = d.add_step_after(2, "left", info("l"), &[root]);
        let join = d.add_step_after(4, "join", info("j"), &[left, right]);
        let plan = d.finish().unwrap();
        assert_eq!(plan.execution_order().unwrap(), vec![root, left, right, join]);
    }

    // =====================================================================
    // Transitions and counters
    // =====================================================================

    #[test]
    fn test_transition_step_recounts() {
        let mut d = draft();
        let a = d.add_step(1, "one", info("a"));
        let b = d.add_step(2, "two", info("b"));
        let c = d.add_step(3, "three", info("c"));
        let mut plan = d.finish().unwrap();

        plan.transition_step(a, StepStatus::Approved).unwrap();
        plan.transition_step(a, StepStatus::InProgress).unwrap();
        plan.transition_step(a, StepStatus::Error).unwrap();
        plan.transition_step(b, StepStatus::Rejected).unwrap();
        plan.transition_step(c, StepStatus::Skipped).unwrap();

        assert_eq!(plan.failed_steps, 1);
        assert_eq!(plan.rejected_steps, 1);
        assert_eq!(plan.skipped_steps, 1);
        assert_eq!(plan.completed_steps, 0);
        assert!(plan.counters_balance());
        assert!(plan.all_steps_settled());
        assert_eq!(plan.outcome(), PlanStatus::Partial);
    }

    #[test]
    fn test_outcome_ignores_cancelled_skips() {
        let mut d = draft();
        let a = d.add_step(1, "one", info("a"));
        let b = d.add_step(2, "two", info("b"));
        let mut plan = d.finish().unwrap();

        plan.transition_step(a, StepStatus::Approved).unwrap();
        plan.transition_step(a, StepStatus::InProgress).unwrap();
        plan.transition_step(a, StepStatus::Completed).unwrap();
        plan.step_mut(b).unwrap().skip_reason = Some(SkipReason::ActionCancelled);
        plan.transition_step(b, StepStatus::Skipped).unwrap();
        assert_eq!(plan.outcome(), PlanStatus::Completed);

        plan.step_mut(b).unwrap().skip_reason = Some(SkipReason::StopOnError { failed: a });
        assert_eq!(plan.outcome(), PlanStatus::Partial);
    }

    #[test]
    fn test_invalid_step_transition_leaves_step_unchanged() {
        let mut d = draft();
        let a = d.add_step(1, "one", info("a"));
        let mut plan = d.finish().unwrap();

        let err = plan.transition_step(a, StepStatus::Completed).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(TransitionError::Step(
                StepStatus::Pending,
                StepStatus::Completed
            ))
        );
        assert_eq!(plan.step(a).unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_transition_unknown_step() {
        let mut plan = draft().finish().unwrap();
        let ghost = Uuid::new_v4();
        assert_eq!(
            plan.transition_step(ghost, StepStatus::Approved).unwrap_err(),
            PlanError::UnknownStep(ghost)
        );
    }

    #[test]
    fn test_plan_transition_validated() {
        let mut plan = draft().finish().unwrap();
        assert!(plan.transition(PlanStatus::Executing).is_err());
        assert_eq!(plan.status, PlanStatus::Pending);
        plan.transition(PlanStatus::Approved).unwrap();
        plan.transition(PlanStatus::Executing).unwrap();
        plan.transition(PlanStatus::Completed).unwrap();
        assert!(plan.transition(PlanStatus::Cancelled).is_err());
    }
}
