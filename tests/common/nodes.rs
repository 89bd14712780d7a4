use async_trait::async_trait;
use relaygraph::message::Message;
use relaygraph::node::{Node, NodeContext, NodeError, NodePartial};
use relaygraph::state::StateSnapshot;
use relaygraph::utils::collections::new_extra_map;
use serde_json::Value;
use std::time::Duration;

/// Appends one assistant message per run.
#[derive(Debug, Clone)]
pub struct SimpleMessageNode {
    pub msg: &'static str,
}

impl SimpleMessageNode {
    pub fn new(msg: &'static str) -> Self {
        Self { msg }
    }
}

#[async_trait]
impl Node for SimpleMessageNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new().with_messages(vec![Message::assistant(self.msg)]))
    }
}

/// Returns an empty delta.
#[derive(Debug, Clone)]
pub struct NoopNode;

#[async_trait]
impl Node for NoopNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::default())
    }
}

/// Writes a fixed value into the extras channel.
#[derive(Debug, Clone)]
pub struct SetExtraNode {
    pub key: &'static str,
    pub value: Value,
}

impl SetExtraNode {
    pub fn new(key: &'static str, value: Value) -> Self {
        Self { key, value }
    }
}

#[async_trait]
impl Node for SetExtraNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let mut extra = new_extra_map();
        extra.insert(self.key.to_string(), self.value.clone());
        Ok(NodePartial::new().with_extra(extra))
    }
}

/// Always fails with a validation error.
#[derive(Debug, Clone)]
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Err(NodeError::ValidationFailed("always fails".into()))
    }
}

/// Sleeps for a fixed duration, then returns an empty delta. Used to keep a
/// thread running long enough to cancel it.
#[derive(Debug, Clone)]
pub struct SlowNode {
    pub delay: Duration,
}

impl SlowNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Node for SlowNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodePartial::default())
    }
}
