//! Invocation outcomes.

use crate::event_bus::TriggerEvent;
use crate::state::ExecutionState;
use crate::types::NodeKind;

/// Why a thread stopped without completing or failing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// `max_iterations` was reached with a non-terminal node pending.
    IterationLimit,
    /// Cooperative cancellation between steps.
    Cancelled,
}

/// Final state of a thread at the end of an invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Reached a terminal node.
    Completed,
    /// Stopped at an interrupt point; resumable from the checkpoint.
    Suspended,
    /// A node returned a fatal error and no on-error hook rerouted it.
    Failed { node: NodeKind, error: String },
    /// Stopped by the engine.
    Terminated { reason: TerminationReason },
}

impl ThreadStatus {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, ThreadStatus::Completed)
    }
}

/// Everything an invocation produced.
#[derive(Debug)]
pub struct ExecutionResult {
    pub thread_id: String,
    pub status: ThreadStatus,
    /// Merged state at the point the thread stopped.
    pub state: ExecutionState,
    /// Trigger events fired during this invocation, in firing order.
    pub trigger_events: Vec<TriggerEvent>,
    /// Steps completed during this invocation.
    pub steps: u64,
}
