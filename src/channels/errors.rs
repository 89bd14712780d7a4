use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents an error event with scope, error details, tags, and context.
///
/// Error events are the non-fatal error currency of the engine: hooks,
/// triggers, and nodes record recoverable failures here while the main
/// execution path continues. Fatal failures use the typed error enums in
/// [`crate::runtime`] instead.
///
/// # Examples
///
/// ```
/// use relaygraph::channels::errors::{CauseChain, ErrorEvent};
/// use serde_json::json;
///
/// let event = ErrorEvent::node("parser", 1, CauseChain::msg("parse error"))
///     .with_tag("validation")
///     .with_context(json!({"line": 42}));
/// assert_eq!(event.tags, vec!["validation".to_string()]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: CauseChain,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    /// Create a node-scoped error event.
    pub fn node<S: Into<String>>(kind: S, step: u64, error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Node {
                kind: kind.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create a hook-scoped error event. Hook failures never abort a step,
    /// so they always arrive here rather than as typed errors.
    pub fn hook<S: Into<String>, P: Into<String>>(
        node: S,
        phase: P,
        step: u64,
        error: CauseChain,
    ) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Hook {
                node: node.into(),
                phase: phase.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create a trigger-scoped error event.
    pub fn trigger<S: Into<String>>(trigger_id: S, step: u64, error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Trigger {
                id: trigger_id.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create an engine-scoped error event.
    pub fn engine<S: Into<String>>(thread: S, step: u64, error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Engine {
                thread: thread.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Attach a classification tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attach arbitrary JSON context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Where in the engine an error event originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    /// Raised while executing a node's own logic.
    Node { kind: String, step: u64 },
    /// Raised inside a hook; isolated from the main path.
    Hook {
        node: String,
        phase: String,
        step: u64,
    },
    /// Raised while evaluating a trigger; skipped for that cycle only.
    Trigger { id: String, step: u64 },
    /// Raised by the execution engine itself.
    Engine { thread: String, step: u64 },
    /// Application-level scope when no finer attribution exists.
    App,
}

impl Default for ErrorScope {
    fn default() -> Self {
        ErrorScope::App
    }
}

/// A recursive message/cause chain with optional structured details.
///
/// Keeps serialized error shapes independent of any particular `Error`
/// implementation so persisted checkpoints remain readable across versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CauseChain {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<CauseChain>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl CauseChain {
    /// Single-message chain with no cause and no details.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Chain a deeper cause under this error.
    #[must_use]
    pub fn caused_by(mut self, cause: CauseChain) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
