//! User confirmation flow for action execution.
//!
//! A worker that needs the user's approval registers a request here and
//! suspends on the returned receiver. Whoever changes the action's state
//! (a confirmation, a step decision, a cancellation) resolves the request to
//! wake the worker, which then reads the new state from the queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sesh_core::types::{RiskLevel, ThreadId, Timestamp};
use tokio::sync::oneshot;
use uuid::Uuid;

/// A pending confirmation request for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub action_id: Uuid,
    pub thread_id: ThreadId,
    pub description: String,
    pub risk_level: RiskLevel,
    /// Policy rules that required confirmation.
    pub reasons: Vec<String>,
    pub requested_at: Timestamp,
}

struct Waiter {
    request: PendingConfirmation,
    wake: oneshot::Sender<()>,
}

/// Gate that parks actions until the user answers.
#[derive(Default)]
pub struct ConfirmationGate {
    pending: Mutex<VecDeque<Waiter>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a confirmation request. The receiver fires once the request is
    /// resolved.
    pub fn register(&self, request: PendingConfirmation) -> oneshot::Receiver<()> {
        let (wake, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|w| w.request.action_id != request.action_id);
        pending.push_back(Waiter { request, wake });
        rx
    }

    /// Remove a request and wake its worker.
    ///
    /// Returns `false` if no request exists for the action.
    pub fn resolve(&self, action_id: Uuid) -> bool {
        match self.take(action_id) {
            Some(waiter) => {
                let _ = waiter.wake.send(());
                true
            }
            None => false,
        }
    }

    /// Remove a request without waking anyone. Used when the waiter itself
    /// gave up.
    pub fn withdraw(&self, action_id: Uuid) -> bool {
        self.take(action_id).is_some()
    }

    fn take(&self, action_id: Uuid) -> Option<Waiter> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let pos = pending.iter().position(|w| w.request.action_id == action_id)?;
        pending.remove(pos)
    }

    pub fn is_pending(&self, action_id: Uuid) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.iter().any(|w| w.request.action_id == action_id)
    }

    /// Open requests of a thread, oldest first.
    pub fn pending_for(&self, thread_id: &ThreadId) -> Vec<PendingConfirmation> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .iter()
            .filter(|w| &w.request.thread_id == thread_id)
            .map(|w| w.request.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(thread: &str) -> PendingConfirmation {
        PendingConfirmation {
            action_id: Uuid::new_v4(),
            thread_id: ThreadId::from(thread),
            description: "Run `make`".to_string(),
            risk_level: RiskLevel::Dangerous,
            reasons: vec!["assisted mode confirms every action".to_string()],
            requested_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let gate = ConfirmationGate::new();
        let req = request("t1");
        let id = req.action_id;

        let rx = gate.register(req);
        assert!(gate.is_pending(id));
        assert_eq!(gate.pending_count(), 1);

        assert!(gate.resolve(id));
        assert!(rx.await.is_ok());
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_does_not_wake() {
        let gate = ConfirmationGate::new();
        let req = request("t1");
        let id = req.action_id;

        let rx = gate.register(req);
        assert!(gate.withdraw(id));
        // Sender dropped without a value.
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_resolve_unknown_returns_false() {
        let gate = ConfirmationGate::new();
        assert!(!gate.resolve(Uuid::new_v4()));
        assert!(!gate.withdraw(Uuid::new_v4()));
    }

    #[test]
    fn test_double_resolve_returns_false() {
        let gate = ConfirmationGate::new();
        let req = request("t1");
        let id = req.action_id;
        let _rx = gate.register(req);
        assert!(gate.resolve(id));
        assert!(!gate.resolve(id));
    }

    #[test]
    fn test_pending_for_filters_by_thread_in_order() {
        let gate = ConfirmationGate::new();
        let a1 = request("a");
        let b1 = request("b");
        let a2 = request("a");
        let (a1_id, a2_id) = (a1.action_id, a2.action_id);

        let _r1 = gate.register(a1);
        let _r2 = gate.register(b1);
        let _r3 = gate.register(a2);

        let ids: Vec<Uuid> = gate
            .pending_for(&ThreadId::from("a"))
            .into_iter()
            .map(|p| p.action_id)
            .collect();
        assert_eq!(ids, vec![a1_id, a2_id]);
    }

    #[test]
    fn test_reregister_replaces_request() {
        let gate = ConfirmationGate::new();
        let req = request("t1");
        let _old = gate.register(req.clone());
        let _new = gate.register(req);
        assert_eq!(gate.pending_count(), 1);
    }
}
