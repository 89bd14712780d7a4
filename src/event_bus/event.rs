use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope label of the diagnostic event that closes a streaming invocation.
pub const STREAM_END_SCOPE: &str = "__relaygraph_stream_end__";

/// Everything that flows over the bus during execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Message emitted by a node through its context.
    Node(NodeEvent),
    /// One completed step of a thread.
    Step(StepEvent),
    /// A monitoring trigger fired.
    Trigger(TriggerEvent),
    /// Engine-level diagnostics, including the stream terminator.
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn node_message(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Node(NodeEvent::new(None, None, None, scope.into(), message.into()))
    }

    pub fn node_message_with_meta(
        thread_id: impl Into<String>,
        node_id: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Node(NodeEvent::new(
            Some(thread_id.into()),
            Some(node_id.into()),
            Some(step),
            scope.into(),
            message.into(),
        ))
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
            thread_id: None,
        })
    }

    /// Diagnostic event that tells one thread's stream consumers no further
    /// events follow.
    pub fn stream_end(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: STREAM_END_SCOPE.to_string(),
            message: message.into(),
            thread_id: Some(thread_id.into()),
        })
    }

    /// The thread this event is attributed to, when it belongs to one.
    /// Thread-scoped sinks use this to keep concurrent invocations apart.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Event::Node(node) => node.thread_id(),
            Event::Step(step) => Some(&step.thread_id),
            Event::Trigger(t) => Some(&t.thread_id),
            Event::Diagnostic(diag) => diag.thread_id(),
        }
    }

    pub fn scope_label(&self) -> Option<&str> {
        match self {
            Event::Node(node) => Some(node.scope()),
            Event::Step(_) => Some("step"),
            Event::Trigger(_) => Some("trigger"),
            Event::Diagnostic(diag) => Some(diag.scope()),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Event::Node(node) => node.message().to_string(),
            Event::Step(step) => format!("{} -> {}", step.node, step.next),
            Event::Trigger(t) => format!("{} fired at {}", t.trigger_id, t.node),
            Event::Diagnostic(diag) => diag.message().to_string(),
        }
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self, Event::Diagnostic(diag) if diag.scope() == STREAM_END_SCOPE)
    }

    /// Convert the event to a normalized JSON object:
    /// `{type, scope, message, timestamp, metadata}`.
    pub fn to_json_value(&self) -> Value {
        use serde_json::json;

        let (event_type, metadata) = match self {
            Event::Node(node) => {
                let mut meta = serde_json::Map::new();
                if let Some(node_id) = node.node_id() {
                    meta.insert("node_id".to_string(), json!(node_id));
                }
                if let Some(step) = node.step() {
                    meta.insert("step".to_string(), json!(step));
                }
                ("node", Value::Object(meta))
            }
            Event::Step(step) => (
                "step",
                json!({
                    "thread_id": step.thread_id,
                    "step": step.step,
                    "node": step.node,
                    "next": step.next,
                    "duration_ms": step.duration_ms,
                }),
            ),
            Event::Trigger(t) => (
                "trigger",
                json!({
                    "trigger_id": t.trigger_id,
                    "node": t.node,
                    "payload": t.payload,
                }),
            ),
            Event::Diagnostic(_) => ("diagnostic", Value::Object(serde_json::Map::new())),
        };

        let timestamp = match self {
            Event::Trigger(t) => t.at,
            _ => Utc::now(),
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": timestamp.to_rfc3339(),
            "metadata": metadata,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Node(node) => match (node.node_id(), node.step()) {
                (Some(id), Some(step)) => write!(f, "[{id}@{step}] {}", node.message()),
                (Some(id), None) => write!(f, "[{id}] {}", node.message()),
                (None, Some(step)) => write!(f, "[step {step}] {}", node.message()),
                (None, None) => write!(f, "{}", node.message()),
            },
            Event::Step(step) => write!(
                f,
                "[{}@{}] {} -> {}",
                step.thread_id, step.step, step.node, step.next
            ),
            Event::Trigger(t) => write!(f, "[trigger {}] fired at {}", t.trigger_id, t.node),
            Event::Diagnostic(diag) => write!(f, "{}", diag.message()),
        }
    }
}

/// Message emitted by a node during its run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEvent {
    #[serde(default)]
    thread_id: Option<String>,
    node_id: Option<String>,
    step: Option<u64>,
    scope: String,
    message: String,
}

impl NodeEvent {
    pub fn new(
        thread_id: Option<String>,
        node_id: Option<String>,
        step: Option<u64>,
        scope: String,
        message: String,
    ) -> Self {
        Self {
            thread_id,
            node_id,
            step,
            scope,
            message,
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn step(&self) -> Option<u64> {
        self.step
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One completed execution step. Streaming consumers receive one of these
/// per node the engine ran.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepEvent {
    pub thread_id: String,
    pub step: u64,
    /// Encoded id of the node that just ran.
    pub node: String,
    /// Encoded id of the node selected to run next.
    pub next: String,
    pub duration_ms: u64,
}

/// Record of a monitoring trigger firing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvent {
    pub trigger_id: String,
    /// Thread whose invocation the trigger was evaluated in.
    #[serde(default)]
    pub thread_id: String,
    /// Encoded id of the node the trigger observed.
    pub node: String,
    pub at: DateTime<Utc>,
    pub payload: Value,
}

impl TriggerEvent {
    pub fn new(
        trigger_id: impl Into<String>,
        thread_id: impl Into<String>,
        node: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            thread_id: thread_id.into(),
            node: node.into(),
            at: Utc::now(),
            payload,
        }
    }
}

/// Engine-level diagnostic message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
    #[serde(default)]
    thread_id: Option<String>,
}

impl DiagnosticEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_event_normalizes_to_json() {
        let event = Event::Step(StepEvent {
            thread_id: "t1".into(),
            step: 3,
            node: "Custom:worker".into(),
            next: "Custom:review".into(),
            duration_ms: 12,
        });
        let value = event.to_json_value();
        assert_eq!(value["type"], "step");
        assert_eq!(value["metadata"]["node"], "Custom:worker");
        assert_eq!(value["metadata"]["step"], 3);
    }

    #[test]
    fn stream_end_is_recognizable() {
        let event = Event::stream_end("t1", "done");
        assert!(event.is_stream_end());
        assert!(!Event::diagnostic("other", "x").is_stream_end());
    }

    #[test]
    fn trigger_event_carries_payload() {
        let event = Event::Trigger(TriggerEvent::new(
            "slow-node",
            "t1",
            "Custom:b",
            json!({"ms": 40}),
        ));
        let value = event.to_json_value();
        assert_eq!(value["metadata"]["trigger_id"], "slow-node");
        assert_eq!(value["metadata"]["payload"]["ms"], 40);
    }

    #[test]
    fn events_carry_their_thread_attribution() {
        let step = Event::Step(StepEvent {
            thread_id: "t1".into(),
            step: 1,
            node: "Custom:a".into(),
            next: "End".into(),
            duration_ms: 0,
        });
        assert_eq!(step.thread_id(), Some("t1"));
        assert_eq!(Event::stream_end("t1", "done").thread_id(), Some("t1"));
        assert_eq!(Event::node_message_with_meta("t1", "a", 1, "s", "m").thread_id(), Some("t1"));
        assert_eq!(Event::diagnostic("scope", "m").thread_id(), None);
    }
}
