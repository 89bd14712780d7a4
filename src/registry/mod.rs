//! Extension registries.
//!
//! Two registries let hosts plug behavior in by tag without touching the
//! engine: routing functions for routed edges, and trigger constructors
//! for monitoring. Both are populated at startup and frozen for the run;
//! the engine only reads them.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::state::StateSnapshot;
use crate::triggers::{
    ConsecutiveErrorsTrigger, NoopProbe, PatternTrigger, ResourceProbe, ResourceTrigger,
    StateChangeTrigger, TimingTrigger, Trigger, TriggerConfig, TriggerError,
};
use crate::types::NodeKind;

/// A routing function referenced by routed edges.
///
/// Receives the snapshot and the params stored on the edge; returns the
/// node to transition to. Failures make the engine take the edge's
/// fallback.
pub trait RoutingFn: Send + Sync {
    fn route(&self, snapshot: &StateSnapshot, params: &Value) -> Result<NodeKind, RoutingError>;
}

impl<F> RoutingFn for F
where
    F: Fn(&StateSnapshot, &Value) -> Result<NodeKind, RoutingError> + Send + Sync,
{
    fn route(&self, snapshot: &StateSnapshot, params: &Value) -> Result<NodeKind, RoutingError> {
        self(snapshot, params)
    }
}

/// Errors raised by routing functions.
#[derive(Debug, Error, Diagnostic)]
pub enum RoutingError {
    #[error("routing failed: {0}")]
    #[diagnostic(code(relaygraph::registry::routing_failed))]
    Failed(String),

    #[error("routing params invalid: {0}")]
    #[diagnostic(code(relaygraph::registry::routing_params))]
    InvalidParams(String),
}

/// Tag-indexed registry of routing functions.
#[derive(Clone, Default)]
pub struct RouterRegistry {
    routers: FxHashMap<String, Arc<dyn RoutingFn>>,
}

impl RouterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `extra-key` router, which reads the
    /// extras key named by `params["key"]` and routes to the node id stored
    /// there.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with_router("extra-key", extra_key_router)
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_router(mut self, tag: impl Into<String>, router: impl RoutingFn + 'static) -> Self {
        self.routers.insert(tag.into(), Arc::new(router));
        self
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn RoutingFn>> {
        self.routers.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.routers.contains_key(tag)
    }
}

fn extra_key_router(snapshot: &StateSnapshot, params: &Value) -> Result<NodeKind, RoutingError> {
    let key = params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| RoutingError::InvalidParams("key (string) is required".to_string()))?;
    let target = snapshot
        .extra
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RoutingError::Failed(format!("extras key {key} holds no node id")))?;
    Ok(NodeKind::from(target))
}

/// Constructor turning a [`TriggerConfig`] into a live trigger instance.
pub type TriggerCtor =
    Arc<dyn Fn(&TriggerConfig) -> Result<Box<dyn Trigger>, TriggerError> + Send + Sync>;

/// Tag-indexed registry of trigger constructors.
///
/// The engine calls [`instantiate`](Self::instantiate) once per configured
/// trigger per thread, so each thread gets fresh instance-local state.
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    ctors: FxHashMap<String, TriggerCtor>,
}

impl TriggerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin trigger tags: `timing`,
    /// `state-change`, `pattern`, `consecutive-errors`, and `resource`.
    ///
    /// The builtin `resource` constructor uses [`NoopProbe`]; register it
    /// again via [`with_resource_probe`](Self::with_resource_probe) to
    /// enable memory checks.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with_ctor("timing", |cfg| {
                Ok(Box::new(TimingTrigger::from_params(&cfg.id, &cfg.params)?) as Box<dyn Trigger>)
            })
            .with_ctor("state-change", |cfg| {
                Ok(Box::new(StateChangeTrigger::from_params(&cfg.id, &cfg.params)?) as _)
            })
            .with_ctor("pattern", |cfg| {
                Ok(Box::new(PatternTrigger::from_params(&cfg.id, &cfg.params)?) as _)
            })
            .with_ctor("consecutive-errors", |cfg| {
                Ok(Box::new(ConsecutiveErrorsTrigger::from_params(&cfg.id, &cfg.params)?) as _)
            })
            .with_resource_probe(Arc::new(NoopProbe))
    }

    /// Builder-style registration of a constructor under a tag.
    #[must_use]
    pub fn with_ctor<F>(mut self, tag: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(&TriggerConfig) -> Result<Box<dyn Trigger>, TriggerError> + Send + Sync + 'static,
    {
        self.ctors.insert(tag.into(), Arc::new(ctor));
        self
    }

    /// Registers the `resource` tag backed by the given probe.
    #[must_use]
    pub fn with_resource_probe(self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.with_ctor("resource", move |cfg| {
            Ok(Box::new(ResourceTrigger::from_params(&cfg.id, &cfg.params, probe.clone())?) as _)
        })
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.ctors.contains_key(tag)
    }

    /// Construct a fresh trigger instance from a configuration.
    pub fn instantiate(&self, config: &TriggerConfig) -> Result<Box<dyn Trigger>, TriggerError> {
        let ctor = self
            .ctors
            .get(&config.tag)
            .ok_or_else(|| TriggerError::UnknownTag(config.tag.clone()))?;
        ctor(config)
    }
}
