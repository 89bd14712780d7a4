//! Lifecycle hooks.
//!
//! Hooks are cross-cutting interceptors that observe or redirect execution
//! without touching node logic. They register at startup against a scope
//! (global or a single node) and a phase (before, after, on-error) and are
//! frozen for the run.
//!
//! Hook failures are isolated: the engine logs them and records an error
//! event, but the step proceeds as if the hook had returned
//! [`HookAction::Continue`].

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodePartial;
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// When a hook runs relative to its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before the node executes.
    Before,
    /// After the node executed and its delta was merged.
    After,
    /// After the node returned a fatal error.
    OnError,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Before => "before",
            HookPhase::After => "after",
            HookPhase::OnError => "on_error",
        }
    }
}

/// Which node executions a hook observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookScope {
    /// Every node execution.
    Global,
    /// Executions of one node, by tag.
    Node(String),
}

impl HookScope {
    fn matches(&self, node: &NodeKind) -> bool {
        match self {
            HookScope::Global => true,
            HookScope::Node(tag) => node.tag() == tag,
        }
    }
}

/// What a hook asks the engine to do.
///
/// `SkipNode` is honored only in the before phase; `OverrideNext` only in
/// the after and on-error phases. An action returned in any other phase is
/// logged and ignored.
#[derive(Clone, Debug, Default)]
pub enum HookAction {
    /// Proceed normally.
    #[default]
    Continue,
    /// Skip the node's execution, optionally injecting a delta in place of
    /// its output.
    SkipNode(Option<NodePartial>),
    /// Replace the next node the engine selected.
    OverrideNext(NodeKind),
}

/// Facts about the execution the hook is observing.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub thread_id: String,
    pub step: u64,
    pub node: NodeKind,
    pub phase: HookPhase,
    /// Rendered node error, present in the on-error phase only.
    pub error: Option<String>,
}

/// A lifecycle interceptor.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs and hook-scoped error events.
    fn name(&self) -> &str;

    async fn run(
        &self,
        snapshot: &StateSnapshot,
        ctx: &HookContext,
    ) -> Result<HookAction, HookError>;
}

/// Errors raised inside hooks. Never propagate past the hook manager.
#[derive(Debug, Error, Diagnostic)]
pub enum HookError {
    #[error("hook failed: {0}")]
    #[diagnostic(code(relaygraph::hooks::failed))]
    Failed(String),
}

struct HookRegistration {
    scope: HookScope,
    phase: HookPhase,
    hook: Box<dyn Hook>,
}

/// Ordered collection of hook registrations.
///
/// For a given node and phase, hooks apply global-first, then node-scoped,
/// each group in registration order. The engine takes the first
/// non-`Continue` action; later hooks still run but cannot override it.
#[derive(Default)]
pub struct HookManager {
    registrations: Vec<HookRegistration>,
}

impl HookManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_hook(
        mut self,
        scope: HookScope,
        phase: HookPhase,
        hook: impl Hook + 'static,
    ) -> Self {
        self.register(scope, phase, hook);
        self
    }

    pub fn register(
        &mut self,
        scope: HookScope,
        phase: HookPhase,
        hook: impl Hook + 'static,
    ) -> &mut Self {
        self.registrations.push(HookRegistration {
            scope,
            phase,
            hook: Box::new(hook),
        });
        self
    }

    /// Hooks applicable to one node execution in one phase, in invocation
    /// order: global registrations first, then node-scoped, each group in
    /// registration order.
    pub fn hooks_for(&self, node: &NodeKind, phase: HookPhase) -> Vec<&dyn Hook> {
        let matching = |want_global: bool| {
            self.registrations.iter().filter_map(move |reg| {
                let is_global = reg.scope == HookScope::Global;
                (reg.phase == phase && is_global == want_global && reg.scope.matches(node))
                    .then_some(reg.hook.as_ref())
            })
        };
        matching(true).chain(matching(false)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
