//! Workflow graph model: builder, edges, and validation.

mod builder;
mod edges;

pub use builder::{Graph, GraphBuilder, GraphValidationError};
pub use edges::{Edge, EdgePredicate};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeContext, NodeError, NodePartial};
    use crate::state::StateSnapshot;
    use crate::types::NodeKind;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Node for Noop {
        async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
            Ok(NodePartial::default())
        }
    }

    fn custom(tag: &str) -> NodeKind {
        NodeKind::Custom(tag.into())
    }

    #[test]
    fn linear_graph_compiles() {
        let graph = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("b"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), custom("b"))
            .add_edge(custom("b"), NodeKind::End)
            .compile()
            .unwrap();

        assert_eq!(*graph.entry(), custom("a"));
        assert!(graph.is_terminal(&NodeKind::End));
        assert!(!graph.is_terminal(&custom("a")));
    }

    #[test]
    fn missing_entry_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_edge(custom("a"), NodeKind::End)
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::NoEntry));
    }

    #[test]
    fn undeclared_target_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), custom("ghost"))
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::UnknownTarget { .. }));
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("island"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), NodeKind::End)
            .add_edge(custom("island"), NodeKind::End)
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::Unreachable { .. }));
    }

    #[test]
    fn router_only_destinations_are_not_statically_reachable() {
        // A router may return "hidden" at run time, but reachability only
        // follows declared targets, so the graph needs another edge to it.
        let err = GraphBuilder::new()
            .add_node(custom("chooser"), Noop)
            .add_node(custom("hidden"), Noop)
            .add_node(custom("fallback"), Noop)
            .add_edge(NodeKind::Start, custom("chooser"))
            .add_routed_edge(custom("chooser"), "pick", serde_json::json!({}), custom("fallback"))
            .add_edge(custom("fallback"), NodeKind::End)
            .add_edge(custom("hidden"), NodeKind::End)
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::Unreachable { .. }));
    }

    #[test]
    fn dangling_non_terminal_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::MissingOutgoing { .. }));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("a"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), NodeKind::End)
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateNode { .. }));
    }

    #[test]
    fn second_edge_from_same_source_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("b"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), custom("b"))
            .add_edge(custom("a"), NodeKind::End)
            .add_edge(custom("b"), NodeKind::End)
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::ConflictingEdges { .. }));
    }

    #[test]
    fn declared_terminal_needs_no_outgoing_edge() {
        let graph = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("done"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), custom("done"))
            .add_terminal(custom("done"))
            .compile()
            .unwrap();
        assert!(graph.is_terminal(&custom("done")));
    }

    #[test]
    fn terminal_with_outgoing_edge_is_rejected() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_node(custom("done"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_edge(custom("a"), custom("done"))
            .add_edge(custom("done"), NodeKind::End)
            .add_terminal(custom("done"))
            .compile()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphValidationError::TerminalWithOutgoing { .. }
        ));
    }

    #[test]
    fn conditional_edge_targets_are_validated() {
        let err = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_conditional_edge(
                custom("a"),
                vec![(
                    Arc::new(|_: &StateSnapshot| true) as EdgePredicate,
                    custom("ghost"),
                )],
                NodeKind::End,
            )
            .compile()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::UnknownTarget { .. }));
    }

    #[test]
    fn referenced_routers_lists_routed_tags() {
        let graph = GraphBuilder::new()
            .add_node(custom("a"), Noop)
            .add_edge(NodeKind::Start, custom("a"))
            .add_routed_edge(custom("a"), "intent", serde_json::json!({}), NodeKind::End)
            .compile()
            .unwrap();
        let routers: Vec<&str> = graph.referenced_routers().collect();
        assert_eq!(routers, vec!["intent"]);
    }
}
