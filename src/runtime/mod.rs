//! The runtime layer: engine, configuration, checkpointing, persistence.
//!
//! Start with [`ExecutionContext`] to bundle a compiled graph with its
//! registries and configuration, then drive threads through [`Engine`].
//! Checkpoint stores implement [`Checkpointer`]; [`InMemoryCheckpointer`]
//! covers tests and development, `SqliteCheckpointer` (behind the `sqlite`
//! feature) covers durable deployments.

pub mod checkpointer;
#[cfg(feature = "sqlite")]
pub mod checkpointer_sqlite;
pub mod config;
pub mod context;
pub mod engine;
pub mod outcome;
pub mod persistence;

pub use checkpointer::{
    Checkpoint, CheckpointMeta, CheckpointReason, Checkpointer, CheckpointerError,
    InMemoryCheckpointer,
};
#[cfg(feature = "sqlite")]
pub use checkpointer_sqlite::SqliteCheckpointer;
pub use config::{
    CheckpointFailurePolicy, CheckpointPolicy, CheckpointerType, EventBusConfig, RuntimeConfig,
    SinkConfig,
};
pub use context::ExecutionContext;
pub use engine::{Engine, EngineError, StreamingExecution};
pub use outcome::{ExecutionResult, TerminationReason, ThreadStatus};
pub use persistence::{
    JsonSerializable, PersistedCheckpoint, PersistedMapChannel, PersistedState,
    PersistedVecChannel, PersistenceError,
};
