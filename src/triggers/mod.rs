//! Monitoring triggers.
//!
//! Triggers are watchers that run after every step over a read-only state
//! snapshot, independent of the graph's edges. A firing trigger produces a
//! [`TriggerEvent`](crate::event_bus::TriggerEvent) on the bus and, when
//! configured with [`TriggerAction::ForceTransition`], overrides the next
//! node the engine selected.
//!
//! Trigger instances are per thread and may keep local counters; they are
//! constructed from a [`TriggerConfig`] through the
//! [`TriggerRegistry`](crate::registry::TriggerRegistry).

mod builtin;

pub use builtin::{
    ConsecutiveErrorsTrigger, NoopProbe, PatternTrigger, ResourceProbe, ResourceTrigger,
    StateChangeTrigger, TimingTrigger,
};

use std::time::Duration;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Declarative trigger configuration: a registered tag plus parameters.
///
/// The registry turns one of these into a live [`Trigger`] instance per
/// thread, so instance-local state (counters, last-seen values) never leaks
/// across threads.
#[derive(Clone, Debug)]
pub struct TriggerConfig {
    /// Tag of the constructor registered in the trigger registry.
    pub tag: String,
    /// Identifier reported in trigger events and checkpoint reasons.
    pub id: String,
    /// Constructor parameters, interpreted per tag.
    pub params: Value,
    /// What happens when the trigger fires.
    pub action: TriggerAction,
}

impl TriggerConfig {
    pub fn new(tag: impl Into<String>, id: impl Into<String>, params: Value) -> Self {
        Self {
            tag: tag.into(),
            id: id.into(),
            params,
            action: TriggerAction::Emit,
        }
    }

    /// Make this trigger force a transition when it fires.
    #[must_use]
    pub fn with_forced_transition(mut self, target: NodeKind) -> Self {
        self.action = TriggerAction::ForceTransition(target);
        self
    }
}

/// What a firing trigger does beyond emitting its event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerAction {
    /// Emit a trigger event only.
    Emit,
    /// Emit the event and override the next node the engine selected.
    ForceTransition(NodeKind),
}

/// Read-only execution facts handed to triggers alongside the snapshot.
#[derive(Clone, Debug)]
pub struct TriggerContext {
    pub thread_id: String,
    /// Step that just completed.
    pub step: u64,
    /// Node that just ran.
    pub node: NodeKind,
    /// Wall-clock duration of that node's run.
    pub last_duration: Duration,
    /// Fatal node errors in a row, reset on any successful run.
    pub consecutive_errors: u32,
    /// Wall-clock time since the thread started or resumed.
    pub elapsed: Duration,
}

/// A live monitoring trigger bound to one thread.
///
/// `evaluate` runs after every step. Returning `Ok(Some(payload))` fires
/// the trigger; the engine builds the event and applies the configured
/// action. Errors are logged and skip the trigger for that cycle only.
pub trait Trigger: Send {
    /// Identifier reported in events and checkpoint reasons.
    fn id(&self) -> &str;

    fn evaluate(
        &mut self,
        snapshot: &StateSnapshot,
        ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError>;
}

impl std::fmt::Debug for dyn Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger").field("id", &self.id()).finish()
    }
}

/// Errors from trigger construction or evaluation.
#[derive(Debug, Error, Diagnostic)]
pub enum TriggerError {
    #[error("invalid trigger params for {tag}: {message}")]
    #[diagnostic(
        code(relaygraph::triggers::invalid_params),
        help("Check the parameter shape documented on the builtin trigger type.")
    )]
    InvalidParams { tag: String, message: String },

    #[error("no trigger constructor registered for tag: {0}")]
    #[diagnostic(code(relaygraph::triggers::unknown_tag))]
    UnknownTag(String),

    #[error(transparent)]
    #[diagnostic(code(relaygraph::triggers::pattern))]
    Pattern(#[from] regex::Error),

    #[error("trigger evaluation failed: {0}")]
    #[diagnostic(code(relaygraph::triggers::evaluation))]
    Evaluation(String),
}
