/*!
Persistence primitives for serializing/deserializing runtime state and
checkpoints (used by the SQLite checkpointer and any future persistent
backends).

Design goals:
- Explicit serde-friendly structs decoupled from the in-memory types.
- Conversion logic localized in From / TryFrom impls so checkpointer
  code stays lean.
- Forward compatibility: unknown NodeKind encodings round-trip as
  `NodeKind::Custom(encoded_string)`.

This module performs no I/O.
*/

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    channels::{Channel, ErrorsChannel, ExtrasChannel, MessagesChannel, errors::ErrorEvent},
    event_bus::TriggerEvent,
    message::Message,
    runtime::checkpointer::{Checkpoint, CheckpointReason},
    state::ExecutionState,
    types::NodeKind,
};

/// Channel that stores a vector collection with version metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedVecChannel<T> {
    pub version: u32,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> Default for PersistedVecChannel<T> {
    fn default() -> Self {
        Self {
            version: 1,
            items: Vec::new(),
        }
    }
}

/// Channel that stores a map collection with version metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedMapChannel<V> {
    pub version: u32,
    #[serde(default)]
    pub map: FxHashMap<String, V>,
}

impl<V> Default for PersistedMapChannel<V> {
    fn default() -> Self {
        Self {
            version: 1,
            map: FxHashMap::default(),
        }
    }
}

/// Complete persisted shape of the in-memory ExecutionState.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub messages: PersistedVecChannel<Message>,
    pub extra: PersistedMapChannel<Value>,
    #[serde(default)]
    pub errors: PersistedVecChannel<ErrorEvent>,
}

/// Full persisted checkpoint representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    pub seq: u64,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub step: u64,
    pub state: PersistedState,
    /// Next node encoded via NodeKind::encode().
    pub next_node: String,
    pub reason: CheckpointReason,
    /// RFC3339 string form of creation time.
    pub created_at: String,
    #[serde(default)]
    pub trigger_events: Vec<TriggerEvent>,
}

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("missing field: {0}")]
    #[diagnostic(
        code(relaygraph::persistence::missing_field),
        help("Populate the field in the persisted JSON before conversion.")
    )]
    MissingField(&'static str),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(relaygraph::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence error: {0}")]
    #[diagnostic(code(relaygraph::persistence::other))]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// JSON string helpers shared by persistent backends.
pub trait JsonSerializable: Sized {
    fn to_json_string(&self) -> Result<String>;
    fn from_json_str(s: &str) -> Result<Self>;
}

impl<T> JsonSerializable for T
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/* ---------- ExecutionState <-> PersistedState ---------- */

impl From<&ExecutionState> for PersistedState {
    fn from(s: &ExecutionState) -> Self {
        PersistedState {
            messages: PersistedVecChannel {
                version: s.messages.version(),
                items: s.messages.snapshot(),
            },
            extra: PersistedMapChannel {
                version: s.extra.version(),
                map: s.extra.snapshot(),
            },
            errors: PersistedVecChannel {
                version: s.errors.version(),
                items: s.errors.snapshot(),
            },
        }
    }
}

impl TryFrom<PersistedState> for ExecutionState {
    type Error = PersistenceError;

    fn try_from(p: PersistedState) -> Result<Self> {
        Ok(ExecutionState {
            messages: MessagesChannel::new(p.messages.items, p.messages.version),
            extra: ExtrasChannel::new(p.extra.map, p.extra.version),
            errors: ErrorsChannel::new(p.errors.items, p.errors.version),
        })
    }
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            thread_id: cp.thread_id.clone(),
            checkpoint_id: cp.checkpoint_id.clone(),
            seq: cp.seq,
            parent_id: cp.parent_id.clone(),
            step: cp.step,
            state: PersistedState::from(&cp.state),
            next_node: cp.next_node.encode(),
            reason: cp.reason.clone(),
            created_at: cp.created_at.to_rfc3339(),
            trigger_events: cp.trigger_events.clone(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        let state = ExecutionState::try_from(p.state)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&p.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(Checkpoint {
            thread_id: p.thread_id,
            checkpoint_id: p.checkpoint_id,
            seq: p.seq,
            parent_id: p.parent_id,
            step: p.step,
            state,
            next_node: NodeKind::decode(&p.next_node),
            reason: p.reason,
            created_at,
            trigger_events: p.trigger_events,
        })
    }
}
