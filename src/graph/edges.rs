//! Edge types for static and dynamic graph flow.
//!
//! Every non-terminal node owns exactly one outgoing edge construct:
//! a direct edge, an ordered conditional edge with a mandatory default,
//! or a routed edge that defers to a registered routing function.

use serde_json::Value;
use std::sync::Arc;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Predicate for one branch of a conditional edge.
///
/// Evaluated against a read-only [`StateSnapshot`]; returns whether the
/// branch's target should be taken. Predicates must be pure: the engine
/// may evaluate them again when replaying from a checkpoint.
///
/// # Examples
///
/// ```
/// use relaygraph::graph::EdgePredicate;
/// use std::sync::Arc;
///
/// let has_error: EdgePredicate = Arc::new(|snapshot| {
///     snapshot.extra.get("has_error").and_then(|v| v.as_bool()).unwrap_or(false)
/// });
/// ```
pub type EdgePredicate = Arc<dyn Fn(&StateSnapshot) -> bool + Send + Sync + 'static>;

/// Outgoing edge construct of a node.
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition.
    Direct(NodeKind),
    /// Ordered branches evaluated in declaration order; the first predicate
    /// returning `true` wins. `default` is taken when none match.
    Conditional {
        branches: Vec<(EdgePredicate, NodeKind)>,
        default: NodeKind,
    },
    /// Defers to the routing function registered under `router`. `fallback`
    /// is taken when the function fails or names an unknown node.
    ///
    /// Only the fallback is known statically: build-time reachability does
    /// not follow a router's possible return values, so a node reachable
    /// solely through a router needs another declared edge to pass
    /// validation.
    Routed {
        router: String,
        params: Value,
        fallback: NodeKind,
    },
}

impl Edge {
    /// Every statically known node id this edge can transition to. For
    /// routed edges that is only the fallback.
    pub fn targets(&self) -> Vec<&NodeKind> {
        match self {
            Edge::Direct(to) => vec![to],
            Edge::Conditional { branches, default } => {
                let mut targets: Vec<&NodeKind> = branches.iter().map(|(_, to)| to).collect();
                targets.push(default);
                targets
            }
            Edge::Routed { fallback, .. } => vec![fallback],
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { branches, default } => f
                .debug_struct("Conditional")
                .field("branches", &branches.len())
                .field("default", default)
                .finish(),
            Edge::Routed {
                router, fallback, ..
            } => f
                .debug_struct("Routed")
                .field("router", router)
                .field("fallback", fallback)
                .finish(),
        }
    }
}
