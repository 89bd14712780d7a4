//! Built-in trigger implementations.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};

use super::{Trigger, TriggerContext, TriggerError};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

fn invalid(tag: &str, message: impl Into<String>) -> TriggerError {
    TriggerError::InvalidParams {
        tag: tag.to_string(),
        message: message.into(),
    }
}

/// Fires when a node run took at least `threshold`.
///
/// Params: `{"threshold_ms": u64, "node": "tag"?}`. With a node filter only
/// runs of that node are observed. A zero threshold fires on every observed
/// run.
pub struct TimingTrigger {
    id: String,
    threshold: Duration,
    node_filter: Option<NodeKind>,
}

impl TimingTrigger {
    pub fn new(id: impl Into<String>, threshold: Duration, node_filter: Option<NodeKind>) -> Self {
        Self {
            id: id.into(),
            threshold,
            node_filter,
        }
    }

    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self, TriggerError> {
        let threshold_ms = params
            .get("threshold_ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid("timing", "threshold_ms (u64) is required"))?;
        let node_filter = params
            .get("node")
            .and_then(Value::as_str)
            .map(NodeKind::from);
        Ok(Self::new(
            id,
            Duration::from_millis(threshold_ms),
            node_filter,
        ))
    }
}

impl Trigger for TimingTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(
        &mut self,
        _snapshot: &StateSnapshot,
        ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError> {
        if let Some(filter) = &self.node_filter
            && *filter != ctx.node
        {
            return Ok(None);
        }
        if ctx.last_duration >= self.threshold {
            return Ok(Some(json!({
                "duration_ms": ctx.last_duration.as_millis() as u64,
                "threshold_ms": self.threshold.as_millis() as u64,
            })));
        }
        Ok(None)
    }
}

/// Fires when the watched extras key transitions to a new value.
///
/// Params: `{"key": "name"}`. The first observation seeds the baseline
/// without firing.
pub struct StateChangeTrigger {
    id: String,
    key: String,
    last: Option<Value>,
    seeded: bool,
}

impl StateChangeTrigger {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            last: None,
            seeded: false,
        }
    }

    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self, TriggerError> {
        let key = params
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("state-change", "key (string) is required"))?;
        Ok(Self::new(id, key))
    }
}

impl Trigger for StateChangeTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(
        &mut self,
        snapshot: &StateSnapshot,
        _ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError> {
        let current = snapshot.extra.get(&self.key).cloned();
        if !self.seeded {
            self.seeded = true;
            self.last = current;
            return Ok(None);
        }
        if current != self.last {
            let payload = json!({
                "key": self.key,
                "from": self.last.take().unwrap_or(Value::Null),
                "to": current.clone().unwrap_or(Value::Null),
            });
            self.last = current;
            return Ok(Some(payload));
        }
        Ok(None)
    }
}

/// Fires when the most recent message matches a regular expression.
///
/// Params: `{"pattern": "regex"}`.
pub struct PatternTrigger {
    id: String,
    regex: Regex,
}

impl PatternTrigger {
    pub fn new(id: impl Into<String>, pattern: &str) -> Result<Self, TriggerError> {
        Ok(Self {
            id: id.into(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self, TriggerError> {
        let pattern = params
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("pattern", "pattern (string) is required"))?;
        Self::new(id, pattern)
    }
}

impl Trigger for PatternTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(
        &mut self,
        snapshot: &StateSnapshot,
        _ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError> {
        let Some(text) = snapshot.latest_message_text() else {
            return Ok(None);
        };
        if let Some(found) = self.regex.find(text) {
            return Ok(Some(json!({
                "pattern": self.regex.as_str(),
                "matched": found.as_str(),
            })));
        }
        Ok(None)
    }
}

/// Fires when the thread has accumulated `threshold` fatal node errors in
/// a row.
///
/// Params: `{"threshold": u32}`.
pub struct ConsecutiveErrorsTrigger {
    id: String,
    threshold: u32,
}

impl ConsecutiveErrorsTrigger {
    pub fn new(id: impl Into<String>, threshold: u32) -> Self {
        Self {
            id: id.into(),
            threshold,
        }
    }

    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self, TriggerError> {
        let threshold = params
            .get("threshold")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid("consecutive-errors", "threshold (u32) is required"))?;
        Ok(Self::new(id, threshold as u32))
    }
}

impl Trigger for ConsecutiveErrorsTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(
        &mut self,
        _snapshot: &StateSnapshot,
        ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError> {
        if self.threshold > 0 && ctx.consecutive_errors >= self.threshold {
            return Ok(Some(json!({
                "consecutive_errors": ctx.consecutive_errors,
                "threshold": self.threshold,
            })));
        }
        Ok(None)
    }
}

/// Supplies resource readings to [`ResourceTrigger`].
///
/// Injected so the engine stays portable; hosts wire in whatever process
/// accounting they have.
pub trait ResourceProbe: Send + Sync {
    /// Resident memory of the process, if measurable.
    fn memory_bytes(&self) -> Option<u64>;
}

/// Probe that reports nothing; memory limits never fire with it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProbe;

impl ResourceProbe for NoopProbe {
    fn memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Fires when the thread exceeds a wall-clock or memory budget.
///
/// Params: `{"max_elapsed_ms": u64?, "max_memory_bytes": u64?}`. Memory
/// checks need a [`ResourceProbe`] that returns readings.
pub struct ResourceTrigger {
    id: String,
    max_elapsed: Option<Duration>,
    max_memory_bytes: Option<u64>,
    probe: Arc<dyn ResourceProbe>,
}

impl std::fmt::Debug for ResourceTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTrigger")
            .field("id", &self.id)
            .field("max_elapsed", &self.max_elapsed)
            .field("max_memory_bytes", &self.max_memory_bytes)
            .finish_non_exhaustive()
    }
}

impl ResourceTrigger {
    pub fn new(
        id: impl Into<String>,
        max_elapsed: Option<Duration>,
        max_memory_bytes: Option<u64>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            id: id.into(),
            max_elapsed,
            max_memory_bytes,
            probe,
        }
    }

    pub fn from_params(
        id: impl Into<String>,
        params: &Value,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self, TriggerError> {
        let max_elapsed = params
            .get("max_elapsed_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        let max_memory_bytes = params.get("max_memory_bytes").and_then(Value::as_u64);
        if max_elapsed.is_none() && max_memory_bytes.is_none() {
            return Err(invalid(
                "resource",
                "at least one of max_elapsed_ms or max_memory_bytes is required",
            ));
        }
        Ok(Self::new(id, max_elapsed, max_memory_bytes, probe))
    }
}

impl Trigger for ResourceTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(
        &mut self,
        _snapshot: &StateSnapshot,
        ctx: &TriggerContext,
    ) -> Result<Option<Value>, TriggerError> {
        if let Some(limit) = self.max_elapsed
            && ctx.elapsed >= limit
        {
            return Ok(Some(json!({
                "kind": "elapsed",
                "elapsed_ms": ctx.elapsed.as_millis() as u64,
                "max_elapsed_ms": limit.as_millis() as u64,
            })));
        }
        if let Some(limit) = self.max_memory_bytes
            && let Some(used) = self.probe.memory_bytes()
            && used >= limit
        {
            return Ok(Some(json!({
                "kind": "memory",
                "memory_bytes": used,
                "max_memory_bytes": limit,
            })));
        }
        Ok(None)
    }
}
