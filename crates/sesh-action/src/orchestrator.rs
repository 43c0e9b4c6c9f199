//! Execution engine.
//!
//! Public entry point for plans, standalone actions and confirmations. Each
//! thread gets one worker task that drains its queue serially: dispatch the
//! next action, park on the confirmation gate if the policy asks for it, run
//! the executor, record the outcome and append the audit entry.
//!
//! Thread state lives behind a `std::sync::Mutex` that is never held across
//! an `.await`. Events are published on a broadcast channel while the lock is
//! held, so subscribers observe them in transition order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use sesh_core::audit::{AuditLog, ExecutionAuditEntry};
use sesh_core::events::DomainEvent;
use sesh_core::settings::{ExecutionSettings, SettingsStore};
use sesh_core::types::{ExecutionMode, ExecutionProgress, ThreadId, Timestamp};
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::confirmation::{ConfirmationGate, PendingConfirmation};
use crate::error::{EngineError, ExecutionError};
use crate::executor::ToolExecutor;
use crate::plan::Plan;
use crate::queue::{Dispatch, Outbox, Submission, ThreadQueue};
use crate::types::{ActionDetails, ActionProposal, ConfirmationDecision, ExecutionAction};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ThreadState {
    queue: ThreadQueue,
    /// The executing action and its interrupt signal.
    in_flight: Option<(Uuid, Arc<Notify>)>,
}

struct ThreadSlot {
    state: Mutex<ThreadState>,
    running: AtomicBool,
    /// `true` while no worker is busy: none is running, or it is parked on a
    /// confirmation.
    quiet: watch::Sender<bool>,
}

impl ThreadSlot {
    fn new(thread_id: ThreadId) -> Self {
        let (quiet, _) = watch::channel(true);
        Self {
            state: Mutex::new(ThreadState {
                queue: ThreadQueue::new(thread_id),
                in_flight: None,
            }),
            running: AtomicBool::new(false),
            quiet,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct EngineInner {
    executor: Arc<dyn ToolExecutor>,
    audit: Arc<dyn AuditLog>,
    settings: Arc<SettingsStore>,
    gate: ConfirmationGate,
    threads: RwLock<HashMap<ThreadId, Arc<ThreadSlot>>>,
    /// Plan, step, batch and action ids to their thread.
    locator: Mutex<HashMap<Uuid, ThreadId>>,
    events: broadcast::Sender<DomainEvent>,
}

/// What the worker does after dispatching under the lock.
enum Next {
    Continue,
    Park(Uuid, oneshot::Receiver<()>),
    Run(ExecutionAction, Arc<Notify>, ExecutionMode),
    Stop,
}

/// Plan and action execution engine. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        audit: Arc<dyn AuditLog>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                executor,
                audit,
                settings,
                gate: ConfirmationGate::new(),
                threads: RwLock::new(HashMap::new()),
                locator: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    // =========================================================================
    // Plans
    // =========================================================================

    /// Queue a materialized `pending` plan on its thread.
    pub fn submit_plan(&self, plan: Plan) -> Result<Submission, EngineError> {
        let settings = self.inner.settings.execution();
        if plan.steps.len() > settings.max_batch_size {
            return Err(EngineError::BatchTooLarge {
                size: plan.steps.len(),
                max: settings.max_batch_size,
            });
        }
        let thread_id = plan.thread_id.clone();
        let slot = self.inner.slot(&thread_id);
        let mut state = slot.lock();
        let submission = state.queue.enqueue_plan(plan)?;
        self.inner.locate(&thread_id, &submission);
        self.inner.flush(&slot, &mut state);
        self.inner.kick(&slot);
        Ok(submission)
    }

    /// Approve every pending step of a plan. Returns the number of steps
    /// approved.
    pub fn approve_plan(&self, plan_id: Uuid, note: Option<String>) -> Result<usize, EngineError> {
        self.with_queue(plan_id, EngineError::PlanNotFound(plan_id), |queue| {
            queue.approve_plan(plan_id, note)
        })
    }

    pub fn approve_step(&self, step_id: Uuid, note: Option<String>) -> Result<(), EngineError> {
        self.with_queue(step_id, EngineError::StepNotFound(step_id), |queue| {
            queue.approve_step(step_id, note)
        })
    }

    pub fn reject_step(&self, step_id: Uuid, note: Option<String>) -> Result<(), EngineError> {
        self.with_queue(step_id, EngineError::StepNotFound(step_id), |queue| {
            queue.reject_step(step_id, note)
        })
    }

    /// Cancel a plan. Completed steps stay completed, the executing step is
    /// interrupted and everything else is skipped.
    pub fn cancel_plan(&self, plan_id: Uuid) -> Result<(), EngineError> {
        self.with_queue(plan_id, EngineError::PlanNotFound(plan_id), |queue| {
            queue.cancel_plan(plan_id)
        })
    }

    // =========================================================================
    // Standalone actions
    // =========================================================================

    /// Queue proposals as one batch, executed in submission order.
    pub fn submit_actions(
        &self,
        thread_id: &ThreadId,
        proposals: Vec<ActionProposal>,
    ) -> Result<Submission, EngineError> {
        if proposals.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        let max = self.inner.settings.execution().max_batch_size;
        if proposals.len() > max {
            return Err(EngineError::BatchTooLarge {
                size: proposals.len(),
                max,
            });
        }
        let slot = self.inner.slot(thread_id);
        let mut state = slot.lock();
        let submission = state.queue.enqueue_proposals(proposals);
        self.inner.locate(thread_id, &submission);
        self.inner.flush(&slot, &mut state);
        self.inner.kick(&slot);
        Ok(submission)
    }

    /// Queue a single proposal. Returns the action id.
    pub fn submit_action(
        &self,
        thread_id: &ThreadId,
        proposal: ActionProposal,
    ) -> Result<Uuid, EngineError> {
        let submission = self.submit_actions(thread_id, vec![proposal])?;
        submission
            .action_ids
            .first()
            .copied()
            .ok_or(EngineError::EmptyBatch)
    }

    pub fn cancel_action(&self, action_id: Uuid) -> Result<(), EngineError> {
        self.with_queue(action_id, EngineError::ActionNotFound(action_id), |queue| {
            queue.cancel_action(action_id)
        })
    }

    /// Queue a new action built from a failed one. Returns the new action id.
    pub fn resubmit_action(&self, action_id: Uuid) -> Result<Uuid, EngineError> {
        let thread_id = self
            .inner
            .thread_of(action_id)
            .ok_or(EngineError::ActionNotFound(action_id))?;
        let slot = self.inner.slot(&thread_id);
        let mut state = slot.lock();
        let submission = state.queue.resubmit(action_id)?;
        self.inner.locate(&thread_id, &submission);
        self.inner.flush(&slot, &mut state);
        self.inner.kick(&slot);
        submission
            .action_ids
            .first()
            .copied()
            .ok_or(EngineError::EmptyBatch)
    }

    /// Answer a confirmation request.
    pub fn confirm_action(
        &self,
        action_id: Uuid,
        decision: ConfirmationDecision,
        edited_details: Option<ActionDetails>,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        self.with_queue(action_id, EngineError::ActionNotFound(action_id), |queue| {
            queue.confirm(action_id, decision, edited_details, note)
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn plan(&self, plan_id: Uuid) -> Option<Plan> {
        self.read(plan_id, |queue| queue.plan(plan_id).cloned())
    }

    pub fn action(&self, action_id: Uuid) -> Option<ExecutionAction> {
        self.read(action_id, |queue| queue.action(action_id).cloned())
    }

    /// The action created for a plan step.
    pub fn step_action(&self, step_id: Uuid) -> Option<ExecutionAction> {
        self.read(step_id, |queue| {
            queue
                .step_action(step_id)
                .and_then(|id| queue.action(id).cloned())
        })
    }

    /// Every action of a thread in submission order.
    pub fn actions(&self, thread_id: &ThreadId) -> Vec<ExecutionAction> {
        match self.inner.existing_slot(thread_id) {
            Some(slot) => slot.lock().queue.actions(),
            None => Vec::new(),
        }
    }

    pub fn progress(&self, batch_id: Uuid) -> Option<ExecutionProgress> {
        self.read(batch_id, |queue| queue.progress(batch_id))
    }

    /// Open confirmation requests of a thread, oldest first.
    pub fn pending_confirmations(&self, thread_id: &ThreadId) -> Vec<PendingConfirmation> {
        self.inner.gate.pending_for(thread_id)
    }

    /// Effective mode: the thread override, else the live default.
    pub fn thread_mode(&self, thread_id: &ThreadId) -> ExecutionMode {
        self.inner
            .existing_slot(thread_id)
            .and_then(|slot| slot.lock().queue.mode())
            .unwrap_or_else(|| self.inner.settings.execution().default_mode)
    }

    /// Override the mode for one thread. `None` follows the default again.
    /// Takes effect for actions dispatched afterwards.
    pub fn set_thread_mode(&self, thread_id: &ThreadId, mode: Option<ExecutionMode>) {
        let slot = self.inner.slot(thread_id);
        slot.lock().queue.set_mode(mode);
        info!(thread_id = %thread_id, mode = ?mode, "Thread execution mode set");
    }

    pub fn settings(&self) -> Arc<ExecutionSettings> {
        self.inner.settings.execution()
    }

    /// Replace the execution settings. Applies to the next policy evaluation.
    pub fn update_settings(&self, settings: ExecutionSettings) {
        self.inner.settings.update(settings);
        let _ = self.inner.events.send(DomainEvent::SettingsUpdated {
            timestamp: Timestamp::now(),
        });
    }

    /// Wait until the thread's worker has nothing to do or is parked on a
    /// confirmation.
    pub async fn wait_idle(&self, thread_id: &ThreadId) {
        let Some(slot) = self.inner.existing_slot(thread_id) else {
            return;
        };
        let mut rx = slot.quiet.subscribe();
        let _ = rx.wait_for(|quiet| *quiet).await;
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Every domain event, for all threads.
    pub fn events(&self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(|result| result.ok())
    }

    /// Domain events of one thread.
    pub fn subscribe(&self, thread_id: &ThreadId) -> impl Stream<Item = DomainEvent> + Send + 'static {
        let thread_id = thread_id.clone();
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(move |result| match result {
            Ok(event) if event.thread_id() == Some(&thread_id) => Some(event),
            _ => None,
        })
    }

    /// Progress snapshots of one thread, one per state change.
    pub fn on_progress(
        &self,
        thread_id: &ThreadId,
    ) -> impl Stream<Item = ExecutionProgress> + Send + 'static {
        let thread_id = thread_id.clone();
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(move |result| match result {
            Ok(DomainEvent::ProgressUpdated { progress, .. }) if progress.thread_id == thread_id => {
                Some(progress)
            }
            _ => None,
        })
    }

    /// Audit entries of one thread, after they were written.
    pub fn on_audit_append(
        &self,
        thread_id: &ThreadId,
    ) -> impl Stream<Item = ExecutionAuditEntry> + Send + 'static {
        let thread_id = thread_id.clone();
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(move |result| match result {
            Ok(DomainEvent::AuditAppended { entry }) if entry.thread_id == thread_id => Some(entry),
            _ => None,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn with_queue<T>(
        &self,
        id: Uuid,
        missing: EngineError,
        f: impl FnOnce(&mut ThreadQueue) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let thread_id = self.inner.thread_of(id).ok_or(missing)?;
        let slot = self.inner.slot(&thread_id);
        let mut state = slot.lock();
        let result = f(&mut state.queue);
        self.inner.flush(&slot, &mut state);
        result
    }

    fn read<T>(&self, id: Uuid, f: impl FnOnce(&ThreadQueue) -> Option<T>) -> Option<T> {
        let thread_id = self.inner.thread_of(id)?;
        let slot = self.inner.existing_slot(&thread_id)?;
        let state = slot.lock();
        f(&state.queue)
    }
}

impl EngineInner {
    fn slot(&self, thread_id: &ThreadId) -> Arc<ThreadSlot> {
        if let Some(slot) = self.existing_slot(thread_id) {
            return slot;
        }
        let mut threads = self.threads.write().unwrap_or_else(|e| e.into_inner());
        threads
            .entry(thread_id.clone())
            .or_insert_with(|| Arc::new(ThreadSlot::new(thread_id.clone())))
            .clone()
    }

    fn existing_slot(&self, thread_id: &ThreadId) -> Option<Arc<ThreadSlot>> {
        let threads = self.threads.read().unwrap_or_else(|e| e.into_inner());
        threads.get(thread_id).cloned()
    }

    fn thread_of(&self, id: Uuid) -> Option<ThreadId> {
        let locator = self.locator.lock().unwrap_or_else(|e| e.into_inner());
        locator.get(&id).cloned()
    }

    fn locate(&self, thread_id: &ThreadId, submission: &Submission) {
        let mut locator = self.locator.lock().unwrap_or_else(|e| e.into_inner());
        let ids = submission
            .plan_id
            .iter()
            .chain(std::iter::once(&submission.batch_id))
            .chain(submission.step_ids.iter())
            .chain(submission.action_ids.iter());
        for id in ids {
            locator.insert(*id, thread_id.clone());
        }
    }

    fn forget(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        let mut locator = self.locator.lock().unwrap_or_else(|e| e.into_inner());
        for id in ids {
            locator.remove(id);
        }
    }

    /// Publish queued events and deliver wake-ups. Called with the thread
    /// lock held.
    fn flush(&self, slot: &ThreadSlot, state: &mut ThreadState) {
        let Outbox {
            events,
            released,
            interrupted,
        } = state.queue.take_outbox();

        for event in events {
            debug!(event = event.event_name(), "Publishing event");
            let _ = self.events.send(event);
        }
        if !released.is_empty() {
            slot.quiet.send_replace(false);
        }
        for action_id in released {
            self.gate.resolve(action_id);
        }
        for action_id in interrupted {
            if let Some((id, notify)) = &state.in_flight {
                if *id == action_id {
                    notify.notify_one();
                }
            }
        }
    }

    /// Start the thread's worker unless one is already running. Called with
    /// the thread lock held.
    fn kick(self: &Arc<Self>, slot: &Arc<ThreadSlot>) {
        slot.quiet.send_replace(false);
        if !slot.running.swap(true, Ordering::SeqCst) {
            tokio::spawn(Arc::clone(self).drain(Arc::clone(slot)));
        }
    }

    async fn drain(self: Arc<Self>, slot: Arc<ThreadSlot>) {
        loop {
            let next = self.dispatch_next(&slot);
            match next {
                Next::Continue => {}
                Next::Stop => return,
                Next::Park(action_id, rx) => self.park(&slot, action_id, rx).await,
                Next::Run(action, notify, mode) => self.run(&slot, action, notify, mode).await,
            }
        }
    }

    fn dispatch_next(&self, slot: &ThreadSlot) -> Next {
        let settings = self.settings.execution();
        let mut state = slot.lock();

        let Some(action_id) = state.queue.next_action() else {
            let evicted = state.queue.prune(settings.retained_batches);
            self.forget(&evicted);
            // Cleared under the lock so a concurrent submission either sees
            // the flag down or its action is seen here.
            slot.running.store(false, Ordering::SeqCst);
            slot.quiet.send_replace(true);
            return Next::Stop;
        };
        let mode = state.queue.mode().unwrap_or(settings.default_mode);
        debug!(
            thread_id = %state.queue.thread_id(),
            action_id = %action_id,
            mode = %mode,
            "Dispatching action"
        );

        let next = match state.queue.dispatch(action_id, mode, &settings) {
            Ok(Dispatch::Settled) => Next::Continue,
            Ok(Dispatch::Confirm(request)) => {
                let rx = self.gate.register(request);
                slot.quiet.send_replace(true);
                Next::Park(action_id, rx)
            }
            Ok(Dispatch::Execute(action)) => {
                let notify = Arc::new(Notify::new());
                state.in_flight = Some((action_id, Arc::clone(&notify)));
                Next::Run(action, notify, mode)
            }
            Err(e) => {
                error!(action_id = %action_id, error = %e, "Dispatch failed, stopping worker");
                slot.running.store(false, Ordering::SeqCst);
                slot.quiet.send_replace(true);
                Next::Stop
            }
        };
        self.flush(slot, &mut state);
        next
    }

    /// Wait for the user's answer, then start the action if it was approved.
    async fn park(&self, slot: &ThreadSlot, action_id: Uuid, rx: oneshot::Receiver<()>) {
        let timeout_secs = self.settings.execution().confirmation_timeout_secs;
        let answered = if timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(timeout_secs), rx)
                .await
                .is_ok()
        } else {
            let _ = rx.await;
            true
        };

        let started = {
            let mut state = slot.lock();
            slot.quiet.send_replace(false);
            if !answered {
                self.gate.withdraw(action_id);
                if let Err(e) = state.queue.expire_confirmation(action_id) {
                    warn!(action_id = %action_id, error = %e, "Failed to expire confirmation");
                }
            }
            let mode = state
                .queue
                .mode()
                .unwrap_or_else(|| self.settings.execution().default_mode);
            let started = match state.queue.begin_execution(action_id) {
                Ok(Some(action)) => {
                    let notify = Arc::new(Notify::new());
                    state.in_flight = Some((action_id, Arc::clone(&notify)));
                    Some((action, notify, mode))
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(action_id = %action_id, error = %e, "Failed to start confirmed action");
                    None
                }
            };
            self.flush(slot, &mut state);
            started
        };

        if let Some((action, notify, mode)) = started {
            self.run(slot, action, notify, mode).await;
        }
    }

    /// Execute one action, record its outcome and append the audit entry.
    async fn run(
        &self,
        slot: &ThreadSlot,
        action: ExecutionAction,
        notify: Arc<Notify>,
        mode: ExecutionMode,
    ) {
        let settings = self.settings.execution();
        let timeout_secs = settings.action_timeout_secs;
        let action_id = action.id;

        let outcome = tokio::select! {
            result = self.executor.execute(&action) => result,
            _ = notify.notified() => Err(ExecutionError::Cancelled),
            _ = deadline(timeout_secs) => Err(ExecutionError::Timeout(timeout_secs)),
        };

        let entry = {
            let mut state = slot.lock();
            state.in_flight = None;
            let entry = state
                .queue
                .finish_execution(action_id, outcome, mode, settings.stop_on_error);
            self.flush(slot, &mut state);
            entry
        };

        match entry {
            Ok(Some(entry)) => self.record(entry),
            Ok(None) => {}
            Err(e) => warn!(action_id = %action_id, error = %e, "Failed to record outcome"),
        }
    }

    fn record(&self, entry: ExecutionAuditEntry) {
        match self.audit.append(&entry) {
            Ok(()) => {
                let _ = self.events.send(DomainEvent::AuditAppended { entry });
            }
            Err(e) => warn!(
                action_id = %entry.action_id,
                error = %e,
                "Failed to append audit entry"
            ),
        }
    }
}

/// Resolves after `secs` seconds. Zero never resolves.
async fn deadline(secs: u64) {
    if secs == 0 {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
