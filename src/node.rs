//! Node execution framework.
//!
//! The [`Node`] trait is the unit of computation in a workflow graph. Nodes
//! receive an immutable state snapshot plus an execution context, do their
//! work, and return a [`NodePartial`] delta that the merge barrier folds
//! back into the live state.

use async_trait::async_trait;
use futures_util::future::join_all;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::event_bus::Event;
use crate::message::Message;
use crate::state::StateSnapshot;

/// Core trait defining executable workflow nodes.
///
/// # Error Handling
///
/// Nodes surface problems in two ways:
/// 1. **Fatal errors**: return `Err(NodeError)`; the thread fails (or an
///    on-error hook reroutes it).
/// 2. **Recoverable errors**: add [`ErrorEvent`]s to `NodePartial.errors`
///    and return `Ok`.
///
/// # Examples
///
/// ```rust,no_run
/// use relaygraph::node::{Node, NodeContext, NodePartial, NodeError};
/// use relaygraph::state::StateSnapshot;
/// use async_trait::async_trait;
///
/// struct ValidationNode {
///     required_fields: Vec<String>,
/// }
///
/// #[async_trait]
/// impl Node for ValidationNode {
///     async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
///         ctx.emit("validation", "starting")?;
///         for field in &self.required_fields {
///             if !snapshot.extra.contains_key(field) {
///                 return Err(NodeError::ValidationFailed(format!("missing field: {field}")));
///             }
///         }
///         Ok(NodePartial::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node with the given state snapshot and context.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError>;
}

/// Execution context passed to nodes during workflow execution.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Identifier of the node being run.
    pub node_id: String,
    /// Current execution step number.
    pub step: u64,
    /// Thread this invocation belongs to.
    pub thread_id: String,
    /// Channel for emitting events to the workflow's event system.
    pub event_bus_sender: flume::Sender<Event>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_bus_sender
            .send(Event::node_message_with_meta(
                self.thread_id.clone(),
                self.node_id.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    /// Derive a context for one branch of a fan-out node.
    #[must_use]
    pub fn for_branch(&self, index: usize) -> Self {
        Self {
            node_id: format!("{}#{index}", self.node_id),
            step: self.step,
            thread_id: self.thread_id.clone(),
            event_bus_sender: self.event_bus_sender.clone(),
        }
    }
}

/// Partial state update returned by node execution.
///
/// All fields are optional; nodes touch only the channels they care about.
#[derive(Clone, Debug, Default)]
pub struct NodePartial {
    /// Messages to append to the message history.
    pub messages: Option<Vec<Message>>,
    /// Key-value data to merge into the extras channel.
    pub extra: Option<FxHashMap<String, serde_json::Value>>,
    /// Errors to append to the error collection.
    pub errors: Option<Vec<ErrorEvent>>,
}

impl NodePartial {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: FxHashMap<String, serde_json::Value>) -> Self {
        self.extra = Some(extra);
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Fold another partial into this one, preserving the order of appends.
    /// Extras from `other` win key collisions, matching the barrier's
    /// last-writer semantics for the default overwrite policy.
    pub fn absorb(&mut self, other: NodePartial) {
        if let Some(messages) = other.messages {
            self.messages.get_or_insert_with(Vec::new).extend(messages);
        }
        if let Some(extra) = other.extra {
            self.extra
                .get_or_insert_with(FxHashMap::default)
                .extend(extra);
        }
        if let Some(errors) = other.errors {
            self.errors.get_or_insert_with(Vec::new).extend(errors);
        }
    }
}

/// Composite node that runs a fixed set of branch nodes concurrently.
///
/// Branches all receive the same input snapshot. Their partials are joined
/// in branch index order, so the merged delta is deterministic regardless
/// of completion order. The first branch error fails the whole node.
pub struct FanOut {
    branches: Vec<Arc<dyn Node>>,
}

impl FanOut {
    #[must_use]
    pub fn new(branches: Vec<Arc<dyn Node>>) -> Self {
        Self { branches }
    }
}

#[async_trait]
impl Node for FanOut {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let futures = self
            .branches
            .iter()
            .enumerate()
            .map(|(index, branch)| branch.run(snapshot.clone(), ctx.for_branch(index)));
        let results = join_all(futures).await;

        let mut merged = NodePartial::new();
        for result in results {
            merged.absorb(result?);
        }
        Ok(merged)
    }
}

/// Errors that can occur when using NodeContext methods.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be sent due to event bus disconnection.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(relaygraph::node::event_bus_unavailable),
        help("The event bus may be disconnected or at capacity. Check workflow state.")
    )]
    EventBusUnavailable,
}

/// Fatal errors raised during node execution.
///
/// For recoverable errors that should be tracked without halting the
/// thread, use `NodePartial.errors` instead.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(relaygraph::node::missing_input),
        help("Check that the previous node produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(relaygraph::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(relaygraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(relaygraph::node::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(relaygraph::node::event_bus))]
    EventBus(#[from] NodeContextError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::collections::new_extra_map;
    use serde_json::json;

    struct Tag(&'static str);

    #[async_trait]
    impl Node for Tag {
        async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
            let mut extra = new_extra_map();
            extra.insert(self.0.to_string(), json!(true));
            Ok(NodePartial::new()
                .with_messages(vec![Message::assistant(self.0)])
                .with_extra(extra))
        }
    }

    fn test_ctx() -> NodeContext {
        let (tx, _rx) = flume::unbounded();
        NodeContext {
            node_id: "fan".into(),
            step: 1,
            thread_id: "t".into(),
            event_bus_sender: tx,
        }
    }

    #[tokio::test]
    async fn fan_out_joins_in_branch_index_order() {
        let node = FanOut::new(vec![Arc::new(Tag("alpha")), Arc::new(Tag("beta"))]);
        let partial = node
            .run(StateSnapshot::default(), test_ctx())
            .await
            .unwrap();

        let messages = partial.messages.unwrap();
        assert_eq!(messages[0].content, "alpha");
        assert_eq!(messages[1].content, "beta");
        let extra = partial.extra.unwrap();
        assert!(extra.contains_key("alpha") && extra.contains_key("beta"));
    }

    #[tokio::test]
    async fn fan_out_propagates_branch_failure() {
        struct Boom;
        #[async_trait]
        impl Node for Boom {
            async fn run(
                &self,
                _: StateSnapshot,
                _: NodeContext,
            ) -> Result<NodePartial, NodeError> {
                Err(NodeError::ValidationFailed("branch failed".into()))
            }
        }

        let node = FanOut::new(vec![Arc::new(Tag("ok")), Arc::new(Boom)]);
        let err = node
            .run(StateSnapshot::default(), test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailed(_)));
    }

    #[test]
    fn absorb_appends_and_overwrites() {
        let mut base = NodePartial::new().with_messages(vec![Message::assistant("a")]);
        let mut extra = new_extra_map();
        extra.insert("k".to_string(), json!(2));
        base.absorb(NodePartial::new().with_extra(extra));
        assert_eq!(base.messages.as_ref().unwrap().len(), 1);
        assert_eq!(base.extra.unwrap()["k"], json!(2));
    }
}
