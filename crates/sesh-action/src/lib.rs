//! Plan and action execution engine for Sesh.
//!
//! Turns plans and standalone proposals into risk-classified actions, gates
//! them behind user confirmation according to the thread's execution mode,
//! executes them serially per thread through a pluggable `ToolExecutor` and
//! records every execution in an append-only audit log.

pub mod audit;
pub mod confirmation;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod queue;
pub mod types;

pub use audit::MemoryAuditLog;
pub use confirmation::{ConfirmationGate, PendingConfirmation};
pub use error::{EngineError, ExecutionError, PlanError, TransitionError};
pub use executor::{DryRunExecutor, ToolExecutor};
pub use orchestrator::ExecutionEngine;
pub use plan::{Plan, PlanDraft, PlanStep};
pub use policy::{ConfirmationPolicy, ConfirmationReason};
pub use queue::{Batch, Submission};
pub use types::{ActionDetails, ActionProposal, ConfirmationDecision, ExecutionAction};
