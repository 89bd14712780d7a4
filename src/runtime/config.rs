//! Runtime configuration.

use crate::types::NodeKind;

/// Which checkpoint backend the engine wires up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointerType {
    /// Non-durable, for tests and development.
    InMemory,
    /// Durable SQLite store (requires the `sqlite` feature).
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// When the engine writes checkpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Never write checkpoints. Resume is impossible.
    Disabled,
    /// One checkpoint after every step.
    EveryStep,
    /// One checkpoint after every k-th step (k >= 1). Error, suspension,
    /// and cancellation checkpoints are still written in between.
    EveryN(u64),
    /// Only error, suspension, and cancellation checkpoints.
    OnError,
}

/// What to do when a checkpoint write fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointFailurePolicy {
    /// Abort the invocation with a checkpointer error.
    Abort,
    /// Log a warning and keep executing without the checkpoint.
    Warn,
}

/// Which sinks the engine attaches to its event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self {
            sinks: vec![SinkConfig::StdOut],
        }
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self {
            sinks: vec![SinkConfig::Memory],
        }
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

/// Engine-wide execution settings.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Hard cap on steps per invocation; reaching it terminates the thread.
    pub max_iterations: u64,
    pub checkpoint_policy: CheckpointPolicy,
    pub checkpoint_failure_policy: CheckpointFailurePolicy,
    pub checkpointer: CheckpointerType,
    /// SQLite database name; resolved from `SQLITE_DB_NAME` when unset.
    pub sqlite_db_name: Option<String>,
    /// Nodes the engine suspends in front of instead of running.
    pub interrupt_before: Vec<NodeKind>,
    pub event_bus: EventBusConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            checkpoint_policy: CheckpointPolicy::EveryStep,
            checkpoint_failure_policy: CheckpointFailurePolicy::Abort,
            checkpointer: CheckpointerType::InMemory,
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            interrupt_before: Vec::new(),
            event_bus: EventBusConfig::default(),
        }
    }
}

impl RuntimeConfig {
    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if provided.is_some() {
            return provided;
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "relaygraph.db".to_string()))
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    #[must_use]
    pub fn with_checkpoint_failure_policy(mut self, policy: CheckpointFailurePolicy) -> Self {
        self.checkpoint_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: CheckpointerType) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    #[must_use]
    pub fn with_sqlite_db_name(mut self, name: impl Into<String>) -> Self {
        self.sqlite_db_name = Self::resolve_sqlite_db_name(Some(name.into()));
        self
    }

    /// Suspend the thread whenever this node would run next.
    #[must_use]
    pub fn with_interrupt_before(mut self, node: NodeKind) -> Self {
        self.interrupt_before.push(node);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_memory_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::with_memory_sink())
    }
}
