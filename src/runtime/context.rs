//! Assembled execution environment.
//!
//! An [`ExecutionContext`] bundles everything an invocation needs besides
//! the thread itself: the compiled graph, the registries, the hook manager,
//! the reducer barrier, and the runtime configuration. It is built once at
//! startup, validated, and then only read.

use std::sync::Arc;

use crate::graph::Graph;
use crate::hooks::HookManager;
use crate::reducers::ReducerRegistry;
use crate::registry::{RouterRegistry, TriggerRegistry};
use crate::runtime::RuntimeConfig;
use crate::runtime::engine::EngineError;
use crate::triggers::{TriggerAction, TriggerConfig};

#[derive(Clone)]
pub struct ExecutionContext {
    pub graph: Arc<Graph>,
    pub routers: RouterRegistry,
    pub triggers: TriggerRegistry,
    pub trigger_configs: Vec<TriggerConfig>,
    pub hooks: Arc<HookManager>,
    pub reducers: ReducerRegistry,
    pub config: RuntimeConfig,
}

impl ExecutionContext {
    /// Context with default registries, no hooks, no triggers, and the
    /// default runtime configuration.
    #[must_use]
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            routers: RouterRegistry::with_builtins(),
            triggers: TriggerRegistry::with_builtins(),
            trigger_configs: Vec::new(),
            hooks: Arc::new(HookManager::new()),
            reducers: ReducerRegistry::default(),
            config: RuntimeConfig::default(),
        }
    }

    #[must_use]
    pub fn with_routers(mut self, routers: RouterRegistry) -> Self {
        self.routers = routers;
        self
    }

    #[must_use]
    pub fn with_trigger_registry(mut self, triggers: TriggerRegistry) -> Self {
        self.triggers = triggers;
        self
    }

    /// Adds a trigger configuration; one instance per thread is built from
    /// it at invocation start.
    #[must_use]
    pub fn with_trigger(mut self, config: TriggerConfig) -> Self {
        self.trigger_configs.push(config);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    #[must_use]
    pub fn with_reducers(mut self, reducers: ReducerRegistry) -> Self {
        self.reducers = reducers;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Cross-checks the graph against the registries.
    ///
    /// Fails when a routed edge references an unregistered router, a
    /// trigger configuration references an unregistered tag, or a forced
    /// transition targets a node absent from the graph.
    pub fn validate(&self) -> Result<(), EngineError> {
        for tag in self.graph.referenced_routers() {
            if !self.routers.contains(tag) {
                return Err(EngineError::UnknownRouter {
                    tag: tag.to_string(),
                });
            }
        }
        for config in &self.trigger_configs {
            if !self.triggers.contains(&config.tag) {
                return Err(EngineError::UnknownTriggerTag {
                    tag: config.tag.clone(),
                });
            }
            if let TriggerAction::ForceTransition(target) = &config.action
                && !self.graph.contains(target)
            {
                return Err(EngineError::ForcedTargetMissing {
                    trigger_id: config.id.clone(),
                    node: target.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::node::{Node, NodeContext, NodeError, NodePartial};
    use crate::state::StateSnapshot;
    use crate::types::NodeKind;
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Node for Noop {
        async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
            Ok(NodePartial::default())
        }
    }

    fn graph_with_router(tag: &str) -> Graph {
        GraphBuilder::new()
            .add_node(NodeKind::Custom("a".into()), Noop)
            .add_edge(NodeKind::Start, NodeKind::Custom("a".into()))
            .add_routed_edge(NodeKind::Custom("a".into()), tag, json!({}), NodeKind::End)
            .compile()
            .unwrap()
    }

    #[test]
    fn unregistered_router_is_rejected() {
        let ctx = ExecutionContext::new(graph_with_router("nope"));
        assert!(matches!(
            ctx.validate(),
            Err(EngineError::UnknownRouter { .. })
        ));
    }

    #[test]
    fn builtin_router_passes_validation() {
        let ctx = ExecutionContext::new(graph_with_router("extra-key"));
        ctx.validate().unwrap();
    }

    #[test]
    fn forced_transition_target_must_exist() {
        let graph = GraphBuilder::new()
            .add_node(NodeKind::Custom("a".into()), Noop)
            .add_edge(NodeKind::Start, NodeKind::Custom("a".into()))
            .add_edge(NodeKind::Custom("a".into()), NodeKind::End)
            .compile()
            .unwrap();
        let ctx = ExecutionContext::new(graph).with_trigger(
            TriggerConfig::new("timing", "slow", json!({"threshold_ms": 0}))
                .with_forced_transition(NodeKind::Custom("ghost".into())),
        );
        assert!(matches!(
            ctx.validate(),
            Err(EngineError::ForcedTargetMissing { .. })
        ));
    }
}
