use std::sync::Arc;

use relaygraph::graph::Graph;
use relaygraph::runtime::{Engine, ExecutionContext, InMemoryCheckpointer};
use relaygraph::types::NodeKind;

pub fn custom(tag: &str) -> NodeKind {
    NodeKind::Custom(tag.to_string())
}

/// Engine over an in-memory checkpoint store with default registries.
pub fn test_engine(graph: Graph) -> Engine {
    test_engine_with(ExecutionContext::new(graph))
}

pub fn test_engine_with(ctx: ExecutionContext) -> Engine {
    relaygraph::telemetry::init();
    Engine::with_checkpointer(ctx, Arc::new(InMemoryCheckpointer::new()))
        .expect("engine construction")
}
