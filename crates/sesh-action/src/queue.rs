//! Per-thread action queue.
//!
//! `ThreadQueue` holds every batch, action and plan of one thread and applies
//! all state transitions synchronously. It never awaits: the engine locks it,
//! applies one change, drains the outbox and releases the lock before doing
//! anything asynchronous.
//!
//! Every action transition is mirrored onto the owning plan step, and after
//! each operation the owning plan and batch are re-settled, so counters and
//! aggregate statuses can never drift from the action states.

use std::collections::HashMap;

use sesh_core::audit::ExecutionAuditEntry;
use sesh_core::events::DomainEvent;
use sesh_core::settings::ExecutionSettings;
use sesh_core::types::{
    ActionStatus, ApprovalSource, BatchStatus, ExecutionMode, ExecutionProgress, PlanStatus,
    SkipReason, StepStatus, ThreadId, Timestamp,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confirmation::PendingConfirmation;
use crate::error::{EngineError, ExecutionError, PlanError, TransitionError};
use crate::plan::state_machine::validate_action_transition;
use crate::plan::Plan;
use crate::policy::ConfirmationPolicy;
use crate::types::{ActionDetails, ActionProposal, ConfirmationDecision, ExecutionAction};

/// One unit of submission: a plan, or a group of standalone proposals.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    pub plan_id: Option<Uuid>,
    /// Actions in execution order.
    pub action_ids: Vec<Uuid>,
    pub status: BatchStatus,
    pub created_at: Timestamp,
}

/// What the worker should do with the action it picked.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// The action settled without running (e.g. a dependency did not complete).
    Settled,
    /// Park until the user answers.
    Confirm(PendingConfirmation),
    /// Run it. The action is already `executing`.
    Execute(ExecutionAction),
}

/// Side effects produced while the queue lock was held.
#[derive(Debug, Default)]
pub struct Outbox {
    pub events: Vec<DomainEvent>,
    /// Actions that left `awaiting_confirmation`. Their gate requests must be
    /// resolved so the worker wakes up.
    pub released: Vec<Uuid>,
    /// Executing actions that should be interrupted.
    pub interrupted: Vec<Uuid>,
}

/// Ids created by one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub batch_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub step_ids: Vec<Uuid>,
    pub action_ids: Vec<Uuid>,
}

pub struct ThreadQueue {
    thread_id: ThreadId,
    mode: Option<ExecutionMode>,
    batches: Vec<Batch>,
    actions: HashMap<Uuid, ExecutionAction>,
    plans: HashMap<Uuid, Plan>,
    step_actions: HashMap<Uuid, Uuid>,
    outbox: Outbox,
    dirty: Vec<Uuid>,
}

fn plan_error(err: PlanError) -> EngineError {
    match err {
        PlanError::InvalidTransition(t) => EngineError::InvalidTransition(t),
        PlanError::UnknownStep(id) => EngineError::StepNotFound(id),
        other => EngineError::InvalidPlan(other),
    }
}

impl ThreadQueue {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            mode: None,
            batches: Vec::new(),
            actions: HashMap::new(),
            plans: HashMap::new(),
            step_actions: HashMap::new(),
            outbox: Outbox::default(),
            dirty: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Explicit mode override, if any.
    pub fn mode(&self) -> Option<ExecutionMode> {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Option<ExecutionMode>) {
        self.mode = mode;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn plan(&self, plan_id: Uuid) -> Option<&Plan> {
        self.plans.get(&plan_id)
    }

    pub fn action(&self, action_id: Uuid) -> Option<&ExecutionAction> {
        self.actions.get(&action_id)
    }

    pub fn batch(&self, batch_id: Uuid) -> Option<&Batch> {
        self.batches.iter().find(|b| b.id == batch_id)
    }

    /// Action backing a plan step.
    pub fn step_action(&self, step_id: Uuid) -> Option<Uuid> {
        self.step_actions.get(&step_id).copied()
    }

    /// All actions in submission order.
    pub fn actions(&self) -> Vec<ExecutionAction> {
        self.batches
            .iter()
            .flat_map(|b| b.action_ids.iter())
            .filter_map(|id| self.actions.get(id).cloned())
            .collect()
    }

    /// Whether any action still needs the worker.
    pub fn has_work(&self) -> bool {
        self.actions.values().any(|a| !a.is_terminal())
    }

    pub fn progress(&self, batch_id: Uuid) -> Option<ExecutionProgress> {
        let batch = self.batch(batch_id)?;
        let statuses: Vec<&ExecutionAction> = batch
            .action_ids
            .iter()
            .filter_map(|id| self.actions.get(id))
            .collect();
        let count = |status: ActionStatus| statuses.iter().filter(|a| a.status == status).count();

        let total = statuses.len();
        let completed = count(ActionStatus::Completed);
        let current_action = statuses
            .iter()
            .find(|a| {
                matches!(
                    a.status,
                    ActionStatus::Executing | ActionStatus::AwaitingConfirmation
                )
            })
            .map(|a| a.id);

        Some(ExecutionProgress {
            thread_id: self.thread_id.clone(),
            batch_id,
            plan_id: batch.plan_id,
            status: batch.status,
            total_actions: total,
            completed_actions: completed,
            failed_actions: count(ActionStatus::Failed),
            skipped_actions: count(ActionStatus::Skipped),
            rejected_actions: count(ActionStatus::Rejected),
            current_action,
            percentage: ExecutionProgress::percentage_of(completed, total),
        })
    }

    /// Drain events and wake-ups. Progress is emitted once per touched batch.
    pub fn take_outbox(&mut self) -> Outbox {
        let dirty = std::mem::take(&mut self.dirty);
        for batch_id in dirty {
            if let Some(progress) = self.progress(batch_id) {
                self.emit(DomainEvent::ProgressUpdated {
                    progress,
                    timestamp: Timestamp::now(),
                });
            }
        }
        std::mem::take(&mut self.outbox)
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Evict the oldest finished batches until at most `keep` remain, along
    /// with their plans and actions. Returns every evicted id.
    pub fn prune(&mut self, keep: usize) -> Vec<Uuid> {
        let finished = self.batches.iter().filter(|b| b.status.is_terminal()).count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.batches.len());
        for batch in std::mem::take(&mut self.batches) {
            if excess == 0 || !batch.status.is_terminal() {
                kept.push(batch);
                continue;
            }
            excess -= 1;
            for action_id in &batch.action_ids {
                if let Some(step_id) = self.actions.remove(action_id).and_then(|a| a.plan_step_id) {
                    self.step_actions.remove(&step_id);
                    evicted.push(step_id);
                }
                evicted.push(*action_id);
            }
            if let Some(plan_id) = batch.plan_id {
                self.plans.remove(&plan_id);
                evicted.push(plan_id);
            }
            self.dirty.retain(|id| *id != batch.id);
            evicted.push(batch.id);
        }
        self.batches = kept;

        debug!(thread_id = %self.thread_id, evicted = evicted.len(), "Pruned finished batches");
        evicted
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Turn a pending plan into a batch with one action per step, in
    /// topological order.
    pub fn enqueue_plan(&mut self, mut plan: Plan) -> Result<Submission, EngineError> {
        if plan.status != PlanStatus::Pending {
            return Err(PlanError::NotPending(plan.status).into());
        }
        if self.plans.contains_key(&plan.id) {
            return Err(EngineError::DuplicatePlan(plan.id));
        }
        plan.validate()?;
        let order = plan.execution_order()?;
        plan.recount();

        let batch_id = Uuid::new_v4();
        let mut action_ids = Vec::with_capacity(order.len());
        let mut step_to_action: HashMap<Uuid, Uuid> = HashMap::with_capacity(order.len());

        for step_id in &order {
            let Some(step) = plan.step(*step_id) else {
                continue;
            };
            let mut action = ExecutionAction::new(
                self.thread_id.clone(),
                batch_id,
                step.details.clone(),
                Some(step.description.clone()),
                step.risk_level,
            );
            action.plan_id = Some(plan.id);
            action.plan_step_id = Some(step.id);
            action.depends_on = step
                .depends_on
                .iter()
                .filter_map(|dep| step_to_action.get(dep).copied())
                .collect();

            step_to_action.insert(step.id, action.id);
            action_ids.push(action.id);
            self.step_actions.insert(step.id, action.id);
            self.actions.insert(action.id, action);
        }

        let plan_id = plan.id;
        info!(
            thread_id = %self.thread_id,
            plan_id = %plan_id,
            steps = plan.total_steps,
            "Plan submitted"
        );
        self.emit(DomainEvent::PlanSubmitted {
            thread_id: self.thread_id.clone(),
            plan_id,
            total_steps: plan.total_steps,
            timestamp: Timestamp::now(),
        });
        self.plans.insert(plan_id, plan);
        self.push_batch(batch_id, Some(plan_id), action_ids.clone());
        self.settle(batch_id)?;

        Ok(Submission {
            batch_id,
            plan_id: Some(plan_id),
            step_ids: order,
            action_ids,
        })
    }

    /// Queue standalone proposals as one batch, in submission order.
    pub fn enqueue_proposals(&mut self, proposals: Vec<ActionProposal>) -> Submission {
        let batch_id = Uuid::new_v4();
        let mut action_ids = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let action = ExecutionAction::new(
                self.thread_id.clone(),
                batch_id,
                proposal.details,
                proposal.description,
                proposal.risk_level,
            );
            action_ids.push(action.id);
            self.actions.insert(action.id, action);
        }
        info!(
            thread_id = %self.thread_id,
            batch_id = %batch_id,
            actions = action_ids.len(),
            "Actions submitted"
        );
        self.push_batch(batch_id, None, action_ids.clone());

        Submission {
            batch_id,
            plan_id: None,
            step_ids: Vec::new(),
            action_ids,
        }
    }

    /// Queue a fresh copy of a failed action in its own batch.
    pub fn resubmit(&mut self, action_id: Uuid) -> Result<Submission, EngineError> {
        let action = self
            .actions
            .get(&action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        if action.status != ActionStatus::Failed {
            return Err(EngineError::NotResubmittable(action_id, action.status));
        }
        let proposal = ActionProposal {
            details: action.effective_details().clone(),
            description: Some(action.description.clone()),
            risk_level: Some(action.risk_level),
        };
        info!(thread_id = %self.thread_id, action_id = %action_id, "Resubmitting failed action");
        Ok(self.enqueue_proposals(vec![proposal]))
    }

    fn push_batch(&mut self, batch_id: Uuid, plan_id: Option<Uuid>, action_ids: Vec<Uuid>) {
        for action_id in &action_ids {
            if let Some(action) = self.actions.get(action_id) {
                let event = DomainEvent::ActionQueued {
                    thread_id: self.thread_id.clone(),
                    action_id: *action_id,
                    batch_id,
                    action_type: action.action_type,
                    risk_level: action.risk_level,
                    timestamp: Timestamp::now(),
                };
                self.emit(event);
            }
        }
        self.batches.push(Batch {
            id: batch_id,
            plan_id,
            action_ids,
            status: BatchStatus::Queued,
            created_at: Timestamp::now(),
        });
        self.mark_dirty(batch_id);
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// The next action the worker should look at: first unsettled action of
    /// the oldest unfinished batch.
    pub fn next_action(&self) -> Option<Uuid> {
        self.batches
            .iter()
            .filter(|b| !b.status.is_terminal())
            .flat_map(|b| b.action_ids.iter())
            .find(|id| {
                self.actions.get(*id).is_some_and(|a| {
                    matches!(
                        a.status,
                        ActionStatus::Pending
                            | ActionStatus::Approved
                            | ActionStatus::AwaitingConfirmation
                    )
                })
            })
            .copied()
    }

    /// Decide what happens to `action_id` under the given mode and settings.
    pub fn dispatch(
        &mut self,
        action_id: Uuid,
        mode: ExecutionMode,
        settings: &ExecutionSettings,
    ) -> Result<Dispatch, EngineError> {
        let action = self
            .actions
            .get(&action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        let batch_id = action.batch_id;

        match action.status {
            ActionStatus::Pending => {
                if let Some(reason) = self.blocked_by(action) {
                    debug!(action_id = %action_id, reason = %reason, "Dependency did not complete");
                    self.skip(action_id, reason)?;
                    self.skip_dependents(action_id, reason)?;
                    self.settle(batch_id)?;
                    return Ok(Dispatch::Settled);
                }

                let reasons = ConfirmationPolicy::reasons(mode, action, settings);
                if reasons.is_empty() {
                    debug!(action_id = %action_id, mode = %mode, "Auto-approved by policy");
                    if let Some(action) = self.actions.get_mut(&action_id) {
                        action.approval = Some(ApprovalSource::Policy);
                    }
                    return self.start(action_id).map(Dispatch::Execute);
                }

                let request = PendingConfirmation {
                    action_id,
                    thread_id: self.thread_id.clone(),
                    description: action.description.clone(),
                    risk_level: action.risk_level,
                    reasons: reasons.iter().map(ToString::to_string).collect(),
                    requested_at: Timestamp::now(),
                };
                self.apply(action_id, ActionStatus::AwaitingConfirmation)?;
                info!(
                    thread_id = %self.thread_id,
                    action_id = %action_id,
                    risk = %request.risk_level,
                    "Confirmation requested"
                );
                self.emit(DomainEvent::ConfirmationRequested {
                    thread_id: self.thread_id.clone(),
                    action_id,
                    description: request.description.clone(),
                    risk_level: request.risk_level,
                    reasons: request.reasons.clone(),
                    timestamp: request.requested_at,
                });
                self.settle(batch_id)?;
                Ok(Dispatch::Confirm(request))
            }
            ActionStatus::AwaitingConfirmation => {
                // Re-park an action whose worker went away.
                Ok(Dispatch::Confirm(PendingConfirmation {
                    action_id,
                    thread_id: self.thread_id.clone(),
                    description: action.description.clone(),
                    risk_level: action.risk_level,
                    reasons: Vec::new(),
                    requested_at: Timestamp::now(),
                }))
            }
            ActionStatus::Approved => self.start(action_id).map(Dispatch::Execute),
            _ => Ok(Dispatch::Settled),
        }
    }

    /// Start an action that was approved while the worker was parked.
    /// Returns `None` if it was rejected, skipped or cancelled instead.
    pub fn begin_execution(&mut self, action_id: Uuid) -> Result<Option<ExecutionAction>, EngineError> {
        match self.actions.get(&action_id).map(|a| a.status) {
            Some(ActionStatus::Approved) => self.start(action_id).map(Some),
            Some(_) => Ok(None),
            None => Err(EngineError::ActionNotFound(action_id)),
        }
    }

    fn start(&mut self, action_id: Uuid) -> Result<ExecutionAction, EngineError> {
        self.apply(action_id, ActionStatus::Executing)?;
        let action = self
            .actions
            .get(&action_id)
            .cloned()
            .ok_or(EngineError::ActionNotFound(action_id))?;
        self.settle(action.batch_id)?;
        Ok(action)
    }

    /// Record the executor's outcome and build the audit entry.
    ///
    /// A failure skips the action's dependents. A fatal failure skips the
    /// rest of the batch and moves the plan to `error`. Otherwise, with
    /// `stop_on_error`, the rest of the batch is skipped too.
    pub fn finish_execution(
        &mut self,
        action_id: Uuid,
        outcome: Result<String, ExecutionError>,
        mode: ExecutionMode,
        stop_on_error: bool,
    ) -> Result<Option<ExecutionAuditEntry>, EngineError> {
        let Some(action) = self.actions.get_mut(&action_id) else {
            return Err(EngineError::ActionNotFound(action_id));
        };
        if action.status != ActionStatus::Executing {
            return Ok(None);
        }
        let batch_id = action.batch_id;

        match outcome {
            Ok(result) => {
                action.result = Some(result);
                self.apply(action_id, ActionStatus::Completed)?;
                debug!(action_id = %action_id, "Action completed");
            }
            Err(err) => {
                action.error = Some(err.to_string());
                self.apply(action_id, ActionStatus::Failed)?;
                warn!(
                    thread_id = %self.thread_id,
                    action_id = %action_id,
                    error = %err,
                    "Action failed"
                );
                self.skip_dependents(action_id, SkipReason::DependencyFailed { upstream: action_id })?;

                if err.is_fatal() {
                    self.skip_rest_of_batch(batch_id, SkipReason::ContextLost { failed: action_id })?;
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.id == batch_id) {
                        batch.status = BatchStatus::Error;
                    }
                    let plan_id = self.batch(batch_id).and_then(|b| b.plan_id);
                    if let Some(plan_id) = plan_id {
                        let open = self.plans.get(&plan_id).is_some_and(|p| !p.status.is_terminal());
                        if open {
                            self.set_plan_status(plan_id, PlanStatus::Error)?;
                        }
                    }
                } else if stop_on_error {
                    self.skip_rest_of_batch(batch_id, SkipReason::StopOnError { failed: action_id })?;
                }
            }
        }
        self.settle(batch_id)?;

        Ok(self.actions.get(&action_id).map(|a| audit_entry(a, mode)))
    }

    /// Reject an action whose confirmation window closed.
    pub fn expire_confirmation(&mut self, action_id: Uuid) -> Result<bool, EngineError> {
        let Some(action) = self.actions.get_mut(&action_id) else {
            return Err(EngineError::ActionNotFound(action_id));
        };
        if action.status != ActionStatus::AwaitingConfirmation {
            return Ok(false);
        }
        action.note = Some("confirmation timed out".to_string());
        let batch_id = action.batch_id;
        warn!(thread_id = %self.thread_id, action_id = %action_id, "Confirmation timed out");
        self.reject(action_id)?;
        self.settle(batch_id)?;
        Ok(true)
    }

    // =========================================================================
    // User decisions
    // =========================================================================

    /// Apply the user's answer to a confirmation request.
    pub fn confirm(
        &mut self,
        action_id: Uuid,
        decision: ConfirmationDecision,
        edited_details: Option<ActionDetails>,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        let action = self
            .actions
            .get(&action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        if action.status != ActionStatus::AwaitingConfirmation {
            return Err(EngineError::NotAwaitingConfirmation(action_id));
        }
        let batch_id = action.batch_id;

        let edited = match decision {
            ConfirmationDecision::EditAndApprove => {
                let edited = edited_details.ok_or(EngineError::MissingEditedDetails(action_id))?;
                if edited.action_type() != action.action_type {
                    return Err(EngineError::DetailsMismatch {
                        expected: action.action_type,
                        found: edited.action_type(),
                    });
                }
                Some(edited)
            }
            _ => None,
        };

        info!(
            thread_id = %self.thread_id,
            action_id = %action_id,
            decision = %decision,
            "Confirmation answered"
        );

        if let Some(action) = self.actions.get_mut(&action_id) {
            if note.is_some() {
                action.note = note;
            }
            if let Some(edited) = edited {
                action.risk_level = action.risk_level.max(edited.classify_risk());
                action.user_modified_details = Some(edited);
            }
        }

        match decision {
            ConfirmationDecision::Approve | ConfirmationDecision::EditAndApprove => {
                self.approve(action_id, ApprovalSource::User)?;
            }
            ConfirmationDecision::Reject => self.reject(action_id)?,
        }
        self.settle(batch_id)
    }

    /// Approve a step ahead of (or during) its confirmation.
    pub fn approve_step(&mut self, step_id: Uuid, note: Option<String>) -> Result<(), EngineError> {
        let action_id = self.open_step(step_id, StepStatus::Approved)?;
        self.set_note(action_id, note);
        self.approve(action_id, ApprovalSource::Step)?;
        let batch_id = self.batch_of(action_id)?;
        info!(thread_id = %self.thread_id, step_id = %step_id, "Step approved");
        self.settle(batch_id)
    }

    /// Reject a step. It never executes and its dependents are skipped.
    pub fn reject_step(&mut self, step_id: Uuid, note: Option<String>) -> Result<(), EngineError> {
        let action_id = self.open_step(step_id, StepStatus::Rejected)?;
        self.set_note(action_id, note);
        self.reject(action_id)?;
        let batch_id = self.batch_of(action_id)?;
        info!(thread_id = %self.thread_id, step_id = %step_id, "Step rejected");
        self.settle(batch_id)
    }

    /// Approve every step of the plan that is still pending. Returns how many
    /// steps were approved.
    pub fn approve_plan(&mut self, plan_id: Uuid, note: Option<String>) -> Result<usize, EngineError> {
        let plan = self.plans.get(&plan_id).ok_or(EngineError::PlanNotFound(plan_id))?;
        if plan.status.is_terminal() || plan.status == PlanStatus::Generating {
            return Err(TransitionError::Plan(plan.status, PlanStatus::Approved).into());
        }
        let pending: Vec<Uuid> = plan
            .execution_order()?
            .into_iter()
            .filter(|id| plan.step(*id).is_some_and(|s| s.status == StepStatus::Pending))
            .collect();

        for step_id in &pending {
            if let Some(action_id) = self.step_actions.get(step_id).copied() {
                self.set_note(action_id, note.clone());
                self.approve(action_id, ApprovalSource::Step)?;
            }
        }
        info!(
            thread_id = %self.thread_id,
            plan_id = %plan_id,
            steps = pending.len(),
            "Plan approved"
        );
        if let Some(batch_id) = self.batch_for_plan(plan_id) {
            self.settle(batch_id)?;
        }
        Ok(pending.len())
    }

    /// Cancel a plan: every open step is skipped, an in-flight step is
    /// interrupted, completed steps stay completed.
    pub fn cancel_plan(&mut self, plan_id: Uuid) -> Result<(), EngineError> {
        let plan = self.plans.get(&plan_id).ok_or(EngineError::PlanNotFound(plan_id))?;
        if plan.status.is_terminal() || plan.status == PlanStatus::Generating {
            return Err(TransitionError::Plan(plan.status, PlanStatus::Cancelled).into());
        }
        let batch_id = self
            .batch_for_plan(plan_id)
            .ok_or(EngineError::PlanNotFound(plan_id))?;
        let order = self.batch(batch_id).map(|b| b.action_ids.clone()).unwrap_or_default();

        for action_id in order {
            match self.actions.get(&action_id).map(|a| a.status) {
                Some(
                    ActionStatus::Pending
                    | ActionStatus::AwaitingConfirmation
                    | ActionStatus::Approved,
                ) => self.skip(action_id, SkipReason::PlanCancelled)?,
                Some(ActionStatus::Executing) => self.outbox.interrupted.push(action_id),
                _ => {}
            }
        }
        self.set_plan_status(plan_id, PlanStatus::Cancelled)?;
        self.settle(batch_id)
    }

    /// Cancel one action. Queued actions are skipped along with their
    /// dependents; an executing action is interrupted.
    pub fn cancel_action(&mut self, action_id: Uuid) -> Result<(), EngineError> {
        let action = self
            .actions
            .get(&action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        let batch_id = action.batch_id;
        match action.status {
            ActionStatus::Pending | ActionStatus::AwaitingConfirmation | ActionStatus::Approved => {
                self.skip(action_id, SkipReason::ActionCancelled)?;
                self.skip_dependents(action_id, SkipReason::ActionCancelled)?;
            }
            ActionStatus::Executing => self.outbox.interrupted.push(action_id),
            status => {
                return Err(TransitionError::Action(status, ActionStatus::Skipped).into());
            }
        }
        info!(thread_id = %self.thread_id, action_id = %action_id, "Action cancelled");
        self.settle(batch_id)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn open_step(&self, step_id: Uuid, to: StepStatus) -> Result<Uuid, EngineError> {
        let action_id = self
            .step_actions
            .get(&step_id)
            .copied()
            .ok_or(EngineError::StepNotFound(step_id))?;
        let step_status = self
            .actions
            .get(&action_id)
            .and_then(|a| a.plan_id)
            .and_then(|plan_id| self.plans.get(&plan_id))
            .and_then(|plan| plan.step(step_id))
            .map(|s| s.status)
            .ok_or(EngineError::StepNotFound(step_id))?;
        if step_status != StepStatus::Pending {
            return Err(TransitionError::Step(step_status, to).into());
        }
        Ok(action_id)
    }

    fn approve(&mut self, action_id: Uuid, source: ApprovalSource) -> Result<(), EngineError> {
        if let Some(action) = self.actions.get_mut(&action_id) {
            action.approval = Some(source);
        }
        self.apply(action_id, ActionStatus::Approved)
    }

    fn reject(&mut self, action_id: Uuid) -> Result<(), EngineError> {
        self.apply(action_id, ActionStatus::Rejected)?;
        self.skip_dependents(action_id, SkipReason::DependencyRejected { upstream: action_id })
    }

    fn skip(&mut self, action_id: Uuid, reason: SkipReason) -> Result<(), EngineError> {
        if let Some(action) = self.actions.get_mut(&action_id) {
            action.skip_reason = Some(reason);
        }
        self.apply(action_id, ActionStatus::Skipped)
    }

    fn set_note(&mut self, action_id: Uuid, note: Option<String>) {
        if let (Some(action), Some(note)) = (self.actions.get_mut(&action_id), note) {
            action.note = Some(note);
        }
    }

    /// Skip every open action that transitively depends on `root`.
    fn skip_dependents(&mut self, root: Uuid, reason: SkipReason) -> Result<(), EngineError> {
        let batch_id = self.batch_of(root)?;
        let order = self.batch(batch_id).map(|b| b.action_ids.clone()).unwrap_or_default();
        let mut doomed = vec![root];

        // Batch order is topological, so one pass reaches the fixpoint.
        for action_id in order {
            let Some(action) = self.actions.get(&action_id) else {
                continue;
            };
            if action.is_terminal() || action.status == ActionStatus::Executing {
                continue;
            }
            if action.depends_on.iter().any(|d| doomed.contains(d)) {
                self.skip(action_id, reason)?;
                doomed.push(action_id);
            }
        }
        Ok(())
    }

    fn skip_rest_of_batch(&mut self, batch_id: Uuid, reason: SkipReason) -> Result<(), EngineError> {
        let order = self.batch(batch_id).map(|b| b.action_ids.clone()).unwrap_or_default();
        for action_id in order {
            let open = self.actions.get(&action_id).is_some_and(|a| {
                matches!(
                    a.status,
                    ActionStatus::Pending | ActionStatus::AwaitingConfirmation | ActionStatus::Approved
                )
            });
            if open {
                self.skip(action_id, reason)?;
            }
        }
        Ok(())
    }

    /// The skip cause for an action whose dependencies will never complete.
    fn blocked_by(&self, action: &ExecutionAction) -> Option<SkipReason> {
        action.depends_on.iter().find_map(|dep| {
            let upstream = self.actions.get(dep)?;
            match upstream.status {
                ActionStatus::Rejected => Some(SkipReason::DependencyRejected { upstream: *dep }),
                ActionStatus::Failed => Some(SkipReason::DependencyFailed { upstream: *dep }),
                ActionStatus::Skipped => upstream
                    .skip_reason
                    .or(Some(SkipReason::DependencyFailed { upstream: *dep })),
                _ => None,
            }
        })
    }

    /// Move an action and mirror the change onto its plan step.
    fn apply(&mut self, action_id: Uuid, to: ActionStatus) -> Result<(), EngineError> {
        let action = self
            .actions
            .get_mut(&action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        let from = action.status;
        validate_action_transition(from, to)?;
        action.status = to;
        if to.is_terminal() {
            action.completed_at = Some(Timestamp::now());
        }
        let batch_id = action.batch_id;

        if from == ActionStatus::AwaitingConfirmation {
            self.outbox.released.push(action_id);
        }
        self.emit(DomainEvent::ActionStatusChanged {
            thread_id: self.thread_id.clone(),
            action_id,
            status: to,
            timestamp: Timestamp::now(),
        });
        self.mark_dirty(batch_id);
        self.sync_step(action_id)
    }

    fn sync_step(&mut self, action_id: Uuid) -> Result<(), EngineError> {
        let Some(action) = self.actions.get(&action_id) else {
            return Ok(());
        };
        let (Some(plan_id), Some(step_id)) = (action.plan_id, action.plan_step_id) else {
            return Ok(());
        };
        let path: &[StepStatus] = match action.status {
            ActionStatus::Pending | ActionStatus::AwaitingConfirmation => &[],
            ActionStatus::Approved => &[StepStatus::Approved],
            ActionStatus::Executing => &[StepStatus::Approved, StepStatus::InProgress],
            ActionStatus::Completed => &[
                StepStatus::Approved,
                StepStatus::InProgress,
                StepStatus::Completed,
            ],
            ActionStatus::Failed => &[
                StepStatus::Approved,
                StepStatus::InProgress,
                StepStatus::Error,
            ],
            ActionStatus::Rejected => &[StepStatus::Rejected],
            ActionStatus::Skipped => &[StepStatus::Skipped],
        };
        let skip_reason = action.skip_reason;
        let error = action.error.clone();
        let result = action.result.clone();
        let note = action.note.clone();

        let plan = self
            .plans
            .get_mut(&plan_id)
            .ok_or(EngineError::PlanNotFound(plan_id))?;
        let current = plan
            .step(step_id)
            .map(|s| s.status)
            .ok_or(EngineError::StepNotFound(step_id))?;
        let start = path.iter().position(|s| *s == current).map_or(0, |p| p + 1);

        let mut changed = Vec::new();
        for &to in &path[start..] {
            plan.transition_step(step_id, to).map_err(plan_error)?;
            changed.push(to);
        }
        if let Some(step) = plan.step_mut(step_id) {
            step.skip_reason = skip_reason;
            step.error = error;
            step.result = result;
            if note.is_some() {
                step.note = note;
            }
        }

        for status in changed {
            self.emit(DomainEvent::StepStatusChanged {
                thread_id: self.thread_id.clone(),
                plan_id,
                step_id,
                status,
                timestamp: Timestamp::now(),
            });
        }
        Ok(())
    }

    fn set_plan_status(&mut self, plan_id: Uuid, to: PlanStatus) -> Result<(), EngineError> {
        let plan = self
            .plans
            .get_mut(&plan_id)
            .ok_or(EngineError::PlanNotFound(plan_id))?;
        plan.transition(to)?;
        if to.is_terminal() {
            info!(
                thread_id = %self.thread_id,
                plan_id = %plan_id,
                status = %to,
                completed = plan.completed_steps,
                failed = plan.failed_steps,
                rejected = plan.rejected_steps,
                skipped = plan.skipped_steps,
                "Plan finished"
            );
        }
        self.emit(DomainEvent::PlanStatusChanged {
            thread_id: self.thread_id.clone(),
            plan_id,
            status: to,
            timestamp: Timestamp::now(),
        });
        Ok(())
    }

    /// Re-derive plan and batch status after a change in `batch_id`.
    fn settle(&mut self, batch_id: Uuid) -> Result<(), EngineError> {
        if let Some(plan_id) = self.batch(batch_id).and_then(|b| b.plan_id) {
            self.settle_plan(plan_id)?;
        }
        self.settle_batch(batch_id);
        Ok(())
    }

    fn settle_plan(&mut self, plan_id: Uuid) -> Result<(), EngineError> {
        loop {
            let Some(plan) = self.plans.get(&plan_id) else {
                return Ok(());
            };
            let approved = plan.steps.iter().any(|s| {
                matches!(
                    s.status,
                    StepStatus::Approved
                        | StepStatus::InProgress
                        | StepStatus::Completed
                        | StepStatus::Error
                )
            });
            let started = plan.steps.iter().any(|s| {
                matches!(
                    s.status,
                    StepStatus::InProgress | StepStatus::Completed | StepStatus::Error
                )
            });
            let next = match plan.status {
                status if status.is_terminal() => None,
                _ if plan.all_steps_settled() => Some(plan.outcome()),
                PlanStatus::Pending if approved => Some(PlanStatus::Approved),
                PlanStatus::Approved if started => Some(PlanStatus::Executing),
                _ => None,
            };
            let Some(next) = next else {
                return Ok(());
            };
            // An approved plan that settles after running goes through executing.
            let next = match (plan.status, next) {
                (PlanStatus::Pending, PlanStatus::Completed | PlanStatus::Partial)
                    if started =>
                {
                    PlanStatus::Approved
                }
                (PlanStatus::Approved, PlanStatus::Completed | PlanStatus::Partial)
                    if started =>
                {
                    PlanStatus::Executing
                }
                _ => next,
            };
            self.set_plan_status(plan_id, next)?;
        }
    }

    fn settle_batch(&mut self, batch_id: Uuid) {
        let Some(batch) = self.batch(batch_id) else {
            return;
        };
        if batch.status.is_terminal() {
            return;
        }
        let actions: Vec<&ExecutionAction> = batch
            .action_ids
            .iter()
            .filter_map(|id| self.actions.get(id))
            .collect();
        let all_settled = actions.iter().all(|a| a.is_terminal());
        let plan_cancelled = batch
            .plan_id
            .and_then(|id| self.plans.get(&id))
            .is_some_and(|p| p.status == PlanStatus::Cancelled);

        let next = if all_settled {
            if plan_cancelled {
                BatchStatus::Cancelled
            } else if actions.iter().all(|a| {
                a.status == ActionStatus::Completed
                    || (a.status == ActionStatus::Skipped
                        && a.skip_reason.is_some_and(|r| r.is_cancellation()))
            }) {
                BatchStatus::Completed
            } else {
                BatchStatus::Partial
            }
        } else if actions.iter().any(|a| a.status != ActionStatus::Pending) {
            BatchStatus::Running
        } else {
            BatchStatus::Queued
        };

        if next != batch.status {
            if next.is_terminal() {
                info!(thread_id = %self.thread_id, batch_id = %batch_id, status = %next, "Batch finished");
            }
            if let Some(batch) = self.batches.iter_mut().find(|b| b.id == batch_id) {
                batch.status = next;
            }
            self.mark_dirty(batch_id);
        }
    }

    fn batch_of(&self, action_id: Uuid) -> Result<Uuid, EngineError> {
        self.actions
            .get(&action_id)
            .map(|a| a.batch_id)
            .ok_or(EngineError::ActionNotFound(action_id))
    }

    fn batch_for_plan(&self, plan_id: Uuid) -> Option<Uuid> {
        self.batches
            .iter()
            .find(|b| b.plan_id == Some(plan_id))
            .map(|b| b.id)
    }

    fn mark_dirty(&mut self, batch_id: Uuid) {
        if !self.dirty.contains(&batch_id) {
            self.dirty.push(batch_id);
        }
    }

    fn emit(&mut self, event: DomainEvent) {
        self.outbox.events.push(event);
    }
}

/// Build the immutable record of an executed action.
pub fn audit_entry(action: &ExecutionAction, mode: ExecutionMode) -> ExecutionAuditEntry {
    let approval = action.approval.unwrap_or(ApprovalSource::Policy);
    ExecutionAuditEntry {
        id: Uuid::new_v4(),
        action_id: action.id,
        thread_id: action.thread_id.clone(),
        plan_id: action.plan_id,
        plan_step_id: action.plan_step_id,
        action_type: action.action_type,
        risk_level: action.risk_level,
        mode,
        user_approved: approval.is_user(),
        approval,
        success: action.status == ActionStatus::Completed,
        error: action.error.clone(),
        result: action.result.clone(),
        details: action.details.to_json(),
        modified_details: action.user_modified_details.as_ref().map(ActionDetails::to_json),
        timestamp: Timestamp::now(),
    }
}
