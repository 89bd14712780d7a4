//! GraphBuilder: fluent construction and validation of workflow graphs.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use super::edges::{Edge, EdgePredicate};
use crate::node::Node;
use crate::types::NodeKind;

/// Builder for constructing workflow graphs with a fluent API.
///
/// Every graph needs an entry edge from `NodeKind::Start` and at least one
/// path to a terminal (`NodeKind::End` or a node declared with
/// [`add_terminal`](Self::add_terminal)). `Start` and `End` are virtual
/// endpoints: they carry no implementation and never execute; arrival at a
/// terminal completes the thread.
///
/// # Examples
///
/// ```
/// use relaygraph::graph::GraphBuilder;
/// use relaygraph::types::NodeKind;
///
/// # struct MyNode;
/// # #[async_trait::async_trait]
/// # impl relaygraph::node::Node for MyNode {
/// #     async fn run(&self, _: relaygraph::state::StateSnapshot, _: relaygraph::node::NodeContext) -> Result<relaygraph::node::NodePartial, relaygraph::node::NodeError> {
/// #         Ok(relaygraph::node::NodePartial::default())
/// #     }
/// # }
/// let graph = GraphBuilder::new()
///     .add_node(NodeKind::Custom("worker".into()), MyNode)
///     .add_edge(NodeKind::Start, NodeKind::Custom("worker".into()))
///     .add_edge(NodeKind::Custom("worker".into()), NodeKind::End)
///     .compile()
///     .expect("valid graph");
/// assert_eq!(*graph.entry(), NodeKind::Custom("worker".into()));
/// ```
pub struct GraphBuilder {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Edge>,
    entry: Option<NodeKind>,
    terminals: FxHashSet<NodeKind>,
    duplicate_nodes: Vec<NodeKind>,
    conflicting_edges: Vec<NodeKind>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            entry: None,
            terminals: FxHashSet::default(),
            duplicate_nodes: Vec::new(),
            conflicting_edges: Vec::new(),
        }
    }

    /// Registers a node implementation under a unique identifier.
    ///
    /// `NodeKind::Start` and `NodeKind::End` are virtual endpoints; attempts
    /// to register them are ignored with a warning. Duplicate registrations
    /// are recorded and reported by [`compile`](Self::compile).
    #[must_use]
    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        match id {
            NodeKind::Start | NodeKind::End => {
                tracing::warn!(?id, "ignoring registration of virtual node kind");
            }
            _ => {
                if self.nodes.contains_key(&id) {
                    self.duplicate_nodes.push(id);
                } else {
                    self.nodes.insert(id, Arc::new(node));
                }
            }
        }
        self
    }

    /// Adds an unconditional edge.
    ///
    /// An edge from `Start` declares the entry node. A second edge construct
    /// from the same source is recorded and reported by `compile`; branching
    /// goes through conditional or routed edges, concurrency through a
    /// [`FanOut`](crate::node::FanOut) node.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        if from == NodeKind::Start {
            self.entry = Some(to);
            return self;
        }
        self.insert_edge(from, Edge::Direct(to));
        self
    }

    /// Adds a conditional edge with ordered branches and a mandatory default.
    ///
    /// Branches evaluate in the order given; the first predicate returning
    /// `true` wins, and `default` is taken when none match.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: NodeKind,
        branches: Vec<(EdgePredicate, NodeKind)>,
        default: NodeKind,
    ) -> Self {
        self.insert_edge(from, Edge::Conditional { branches, default });
        self
    }

    /// Adds a routed edge that defers to the routing function registered
    /// under `router`, with `fallback` taken on routing failure.
    #[must_use]
    pub fn add_routed_edge(
        mut self,
        from: NodeKind,
        router: impl Into<String>,
        params: Value,
        fallback: NodeKind,
    ) -> Self {
        self.insert_edge(
            from,
            Edge::Routed {
                router: router.into(),
                params,
                fallback,
            },
        );
        self
    }

    /// Declares a node as terminal: arrival completes the thread and the
    /// node is never executed. `NodeKind::End` is always terminal.
    #[must_use]
    pub fn add_terminal(mut self, node: NodeKind) -> Self {
        self.terminals.insert(node);
        self
    }

    /// Explicitly sets the entry node. Equivalent to an edge from `Start`.
    #[must_use]
    pub fn with_entry(mut self, entry: NodeKind) -> Self {
        self.entry = Some(entry);
        self
    }

    fn insert_edge(&mut self, from: NodeKind, edge: Edge) {
        if self.edges.contains_key(&from) {
            self.conflicting_edges.push(from);
        } else {
            self.edges.insert(from, edge);
        }
    }

    /// Validates the graph and freezes it for execution.
    ///
    /// Checks, in order: duplicate node ids, conflicting edge constructs,
    /// presence of an entry, that all edge endpoints are declared, that
    /// terminals have no outgoing edges, that every non-terminal node has
    /// an outgoing edge, and that every declared node is reachable from
    /// the entry. Reachability follows statically declared targets only
    /// (see [`Edge::targets`]): a routed edge contributes just its
    /// fallback, not the router's possible return values.
    pub fn compile(mut self) -> Result<Graph, GraphValidationError> {
        if let Some(id) = self.duplicate_nodes.first() {
            return Err(GraphValidationError::DuplicateNode { id: id.to_string() });
        }
        if let Some(from) = self.conflicting_edges.first() {
            return Err(GraphValidationError::ConflictingEdges {
                from: from.to_string(),
            });
        }

        let entry = self.entry.take().ok_or(GraphValidationError::NoEntry)?;
        self.terminals.insert(NodeKind::End);

        let declared = |kind: &NodeKind| -> bool {
            matches!(kind, NodeKind::End) || self.nodes.contains_key(kind)
        };

        if !declared(&entry) {
            return Err(GraphValidationError::UnknownTarget {
                from: NodeKind::Start.to_string(),
                to: entry.to_string(),
            });
        }

        for (from, edge) in &self.edges {
            if !declared(from) {
                return Err(GraphValidationError::UnknownSource {
                    from: from.to_string(),
                });
            }
            if self.terminals.contains(from) {
                return Err(GraphValidationError::TerminalWithOutgoing {
                    node: from.to_string(),
                });
            }
            for target in edge.targets() {
                if !declared(target) {
                    return Err(GraphValidationError::UnknownTarget {
                        from: from.to_string(),
                        to: target.to_string(),
                    });
                }
            }
        }

        for kind in self.nodes.keys() {
            if !self.terminals.contains(kind) && !self.edges.contains_key(kind) {
                return Err(GraphValidationError::MissingOutgoing {
                    node: kind.to_string(),
                });
            }
        }

        // Reachability from the entry over all possible edge targets.
        let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
        let mut queue: VecDeque<NodeKind> = VecDeque::new();
        seen.insert(entry.clone());
        queue.push_back(entry.clone());
        while let Some(current) = queue.pop_front() {
            if let Some(edge) = self.edges.get(&current) {
                for target in edge.targets() {
                    if seen.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }
        let unreachable: Vec<String> = self
            .nodes
            .keys()
            .filter(|kind| !seen.contains(kind))
            .map(ToString::to_string)
            .collect();
        if !unreachable.is_empty() {
            return Err(GraphValidationError::Unreachable {
                nodes: unreachable.join(", "),
            });
        }

        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
            terminals: self.terminals,
        })
    }
}

/// An immutable, validated workflow graph.
///
/// Produced by [`GraphBuilder::compile`]; node implementations and edges
/// cannot change after compilation.
#[derive(Clone)]
pub struct Graph {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Edge>,
    entry: NodeKind,
    terminals: FxHashSet<NodeKind>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .field("terminals", &self.terminals)
            .finish()
    }
}

impl Graph {
    /// The node to run first.
    pub fn entry(&self) -> &NodeKind {
        &self.entry
    }

    /// The implementation registered for a node id.
    pub fn node(&self, kind: &NodeKind) -> Option<&Arc<dyn Node>> {
        self.nodes.get(kind)
    }

    /// The outgoing edge of a node.
    pub fn edge(&self, kind: &NodeKind) -> Option<&Edge> {
        self.edges.get(kind)
    }

    /// Whether arrival at this node completes the thread.
    pub fn is_terminal(&self, kind: &NodeKind) -> bool {
        self.terminals.contains(kind)
    }

    /// Whether the node id is part of this graph.
    pub fn contains(&self, kind: &NodeKind) -> bool {
        matches!(kind, NodeKind::End) || self.nodes.contains_key(kind)
    }

    /// Iterate over router tags referenced by routed edges.
    pub fn referenced_routers(&self) -> impl Iterator<Item = &str> {
        self.edges.values().filter_map(|edge| match edge {
            Edge::Routed { router, .. } => Some(router.as_str()),
            _ => None,
        })
    }
}

/// Structural errors detected by [`GraphBuilder::compile`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphValidationError {
    #[error("duplicate node id: {id}")]
    #[diagnostic(
        code(relaygraph::graph::duplicate_node),
        help("Each node id may be registered once per graph.")
    )]
    DuplicateNode { id: String },

    #[error("node {from} has more than one outgoing edge construct")]
    #[diagnostic(
        code(relaygraph::graph::conflicting_edges),
        help("Use a conditional or routed edge for branching, or a FanOut node for concurrency.")
    )]
    ConflictingEdges { from: String },

    #[error("graph has no entry node")]
    #[diagnostic(
        code(relaygraph::graph::no_entry),
        help("Add an edge from NodeKind::Start or call with_entry().")
    )]
    NoEntry,

    #[error("edge source {from} is not a declared node")]
    #[diagnostic(code(relaygraph::graph::unknown_source))]
    UnknownSource { from: String },

    #[error("edge {from} -> {to} targets an undeclared node")]
    #[diagnostic(
        code(relaygraph::graph::unknown_target),
        help("Register the target with add_node or declare it as a terminal.")
    )]
    UnknownTarget { from: String, to: String },

    #[error("terminal node {node} has an outgoing edge")]
    #[diagnostic(code(relaygraph::graph::terminal_with_outgoing))]
    TerminalWithOutgoing { node: String },

    #[error("non-terminal node {node} has no outgoing edge")]
    #[diagnostic(
        code(relaygraph::graph::missing_outgoing),
        help("Every non-terminal node needs a direct, conditional, or routed edge.")
    )]
    MissingOutgoing { node: String },

    #[error("nodes unreachable from the entry: {nodes}")]
    #[diagnostic(
        code(relaygraph::graph::unreachable),
        help(
            "Reachability follows declared edge targets; a routed edge contributes only its fallback. Give nodes reached solely through a router another declared edge."
        )
    )]
    Unreachable { nodes: String },
}
