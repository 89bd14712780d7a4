//! # Relaygraph: Graph-driven Agent Workflow Engine
//!
//! Relaygraph executes multi-step agent workflows as compiled graphs with
//! versioned state channels, deterministic barrier merges, lifecycle hooks,
//! monitoring triggers, and resumable checkpoints.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Async units of work that read a state snapshot and return a delta
//! - **State**: Versioned, channel-based state merged at a barrier after each step
//! - **Graph**: Declarative workflow with direct, conditional, and routed edges
//! - **Hooks**: Cross-cutting interceptors around node execution
//! - **Triggers**: Post-step watchers that can force transitions
//! - **Checkpoints**: Append-only per-thread snapshots enabling resume
//!
//! ## Quick Start
//!
//! ### Defining a node
//!
//! ```
//! use relaygraph::message::Message;
//! use relaygraph::node::{Node, NodeContext, NodeError, NodePartial};
//! use relaygraph::state::StateSnapshot;
//! use async_trait::async_trait;
//!
//! struct GreetingNode;
//!
//! #[async_trait]
//! impl Node for GreetingNode {
//!     async fn run(
//!         &self,
//!         _snapshot: StateSnapshot,
//!         ctx: NodeContext,
//!     ) -> Result<NodePartial, NodeError> {
//!         ctx.emit("greeting", "saying hello")?;
//!         Ok(NodePartial::new().with_messages(vec![Message::assistant("Hello!")]))
//!     }
//! }
//! ```
//!
//! ### Building and running a workflow
//!
//! ```no_run
//! use relaygraph::graph::GraphBuilder;
//! use relaygraph::runtime::{Engine, ExecutionContext};
//! use relaygraph::state::ExecutionState;
//! use relaygraph::types::NodeKind;
//! # use relaygraph::message::Message;
//! # use relaygraph::node::{Node, NodeContext, NodeError, NodePartial};
//! # use relaygraph::state::StateSnapshot;
//! # use async_trait::async_trait;
//! # struct GreetingNode;
//! # #[async_trait]
//! # impl Node for GreetingNode {
//! #     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
//! #         Ok(NodePartial::default())
//! #     }
//! # }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_node(NodeKind::Custom("greet".into()), GreetingNode)
//!     .add_edge(NodeKind::Start, NodeKind::Custom("greet".into()))
//!     .add_edge(NodeKind::Custom("greet".into()), NodeKind::End)
//!     .compile()?;
//!
//! let engine = Engine::new(ExecutionContext::new(graph)).await?;
//! let result = engine
//!     .execute("thread-1", ExecutionState::new_with_user_message("hi"), false)
//!     .await?;
//! assert!(result.status.is_completed());
//! # Ok(())
//! # }
//! ```
//!
//! ### State initialization
//!
//! ```
//! use relaygraph::state::ExecutionState;
//! use serde_json::json;
//!
//! let state = ExecutionState::builder()
//!     .with_user_message("What's the weather?")
//!     .with_system_message("You are a weather assistant")
//!     .with_extra("location", json!("San Francisco"))
//!     .build();
//! ```
//!
//! ## Module Guide
//!
//! - [`message`] - Message types and construction utilities
//! - [`state`] - Versioned state, snapshots, and the state builder
//! - [`channels`] - Channel storage and version tracking
//! - [`reducers`] - Merge strategies and the barrier registry
//! - [`node`] - Node trait, partial deltas, and fan-out composition
//! - [`graph`] - Graph builder, edges, and compile-time validation
//! - [`hooks`] - Lifecycle hooks around node execution
//! - [`triggers`] - Monitoring triggers and their builtins
//! - [`registry`] - Router and trigger registries
//! - [`runtime`] - Engine, configuration, checkpointing, persistence
//! - [`event_bus`] - Event fan-out to sinks and streaming consumers
//! - [`telemetry`] - Tracing setup and event formatting

pub mod channels;
pub mod event_bus;
pub mod graph;
pub mod hooks;
pub mod message;
pub mod node;
pub mod reducers;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod triggers;
pub mod types;
pub mod utils;
