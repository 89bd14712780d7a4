//! Checkpoint model and storage contract.
//!
//! A checkpoint is an immutable snapshot of a thread between steps: the
//! merged state plus enough metadata to resume (most importantly the node
//! to run next). Checkpoints are append-only per thread and chained through
//! `parent_id`.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_bus::TriggerEvent;
use crate::state::ExecutionState;
use crate::types::NodeKind;
use crate::utils::id_generator;

/// Why a checkpoint was written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Regular end-of-step checkpoint.
    Step,
    /// The step's node returned a fatal error.
    Error,
    /// A trigger forced the recorded next node.
    TriggerForced { trigger_id: String },
    /// The thread suspended at an interrupt point.
    Suspended,
    /// The thread was cancelled between steps.
    Cancelled,
}

/// Immutable snapshot of a thread between steps.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    /// Monotonic per-thread sequence number, starting at 1.
    pub seq: u64,
    /// Checkpoint this one chains from, if any.
    pub parent_id: Option<String>,
    /// Steps completed when this checkpoint was written.
    pub step: u64,
    pub state: ExecutionState,
    /// The node the engine will run next; resume starts here, so completed
    /// node logic is never re-run.
    pub next_node: NodeKind,
    pub reason: CheckpointReason,
    pub created_at: DateTime<Utc>,
    /// Trigger events fired up to this point in the invocation.
    pub trigger_events: Vec<TriggerEvent>,
}

impl Checkpoint {
    /// Build the next checkpoint in a thread's chain.
    #[allow(clippy::too_many_arguments)]
    pub fn next_in_chain(
        thread_id: &str,
        seq: u64,
        parent_id: Option<String>,
        step: u64,
        state: &ExecutionState,
        next_node: NodeKind,
        reason: CheckpointReason,
        trigger_events: Vec<TriggerEvent>,
    ) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            checkpoint_id: id_generator::new_checkpoint_id(),
            seq,
            parent_id,
            step,
            state: state.clone(),
            next_node,
            reason,
            created_at: Utc::now(),
            trigger_events,
        }
    }

    /// Metadata-only view for listings.
    #[must_use]
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            checkpoint_id: self.checkpoint_id.clone(),
            seq: self.seq,
            step: self.step,
            next_node: self.next_node.clone(),
            reason: self.reason.clone(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry: checkpoint metadata without the state payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub seq: u64,
    pub step: u64,
    pub next_node: NodeKind,
    pub reason: CheckpointReason,
    pub created_at: DateTime<Utc>,
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(relaygraph::checkpointer::backend))]
    Backend { message: String },

    #[error("checkpoint serialization error: {message}")]
    #[diagnostic(code(relaygraph::checkpointer::serde))]
    Serde { message: String },

    #[error("checkpointer error: {message}")]
    #[diagnostic(code(relaygraph::checkpointer::other))]
    Other { message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Storage contract for checkpoints.
///
/// Implementations must keep per-thread history append-only and ordered by
/// `seq`. The engine serializes writes per thread, so implementations only
/// need cross-thread safety.
#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist one checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// The most recent checkpoint of a thread, if any.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// A specific checkpoint by id.
    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// Metadata of all checkpoints of a thread, ordered by `seq` ascending.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>>;

    /// Delete checkpoints of a thread. With `before_seq`, only those with
    /// `seq` strictly below it. Returns the number deleted.
    async fn delete(&self, thread_id: &str, before_seq: Option<u64>) -> Result<u64>;

    /// Keep only the `retain` most recent checkpoints of a thread.
    /// Returns the number deleted.
    async fn cleanup(&self, thread_id: &str, retain: usize) -> Result<u64>;
}

/// Non-durable checkpointer for tests and development.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    threads: Mutex<FxHashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.threads
            .lock()
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .threads
            .lock()
            .get(thread_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.threads.lock().get(thread_id).and_then(|chain| {
            chain
                .iter()
                .find(|cp| cp.checkpoint_id == checkpoint_id)
                .cloned()
        }))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>> {
        Ok(self
            .threads
            .lock()
            .get(thread_id)
            .map(|chain| chain.iter().map(Checkpoint::meta).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, thread_id: &str, before_seq: Option<u64>) -> Result<u64> {
        let mut threads = self.threads.lock();
        match before_seq {
            None => Ok(threads
                .remove(thread_id)
                .map(|chain| chain.len() as u64)
                .unwrap_or(0)),
            Some(cutoff) => {
                let Some(chain) = threads.get_mut(thread_id) else {
                    return Ok(0);
                };
                let before = chain.len();
                chain.retain(|cp| cp.seq >= cutoff);
                Ok((before - chain.len()) as u64)
            }
        }
    }

    async fn cleanup(&self, thread_id: &str, retain: usize) -> Result<u64> {
        let mut threads = self.threads.lock();
        let Some(chain) = threads.get_mut(thread_id) else {
            return Ok(0);
        };
        if chain.len() <= retain {
            return Ok(0);
        }
        let excess = chain.len() - retain;
        chain.drain(..excess);
        Ok(excess as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(thread: &str, seq: u64) -> Checkpoint {
        Checkpoint::next_in_chain(
            thread,
            seq,
            None,
            seq,
            &ExecutionState::new_with_user_message("hi"),
            NodeKind::Custom("next".into()),
            CheckpointReason::Step,
            vec![],
        )
    }

    #[tokio::test]
    async fn latest_returns_highest_seq() {
        let store = InMemoryCheckpointer::new();
        store.save(checkpoint("t", 1)).await.unwrap();
        store.save(checkpoint("t", 2)).await.unwrap();
        let latest = store.load_latest("t").await.unwrap().unwrap();
        assert_eq!(latest.seq, 2);
    }

    #[tokio::test]
    async fn list_is_ordered_and_scoped_per_thread() {
        let store = InMemoryCheckpointer::new();
        store.save(checkpoint("a", 1)).await.unwrap();
        store.save(checkpoint("a", 2)).await.unwrap();
        store.save(checkpoint("b", 1)).await.unwrap();

        let metas = store.list("a").await.unwrap();
        assert_eq!(metas.len(), 2);
        assert!(metas[0].seq < metas[1].seq);
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_before_seq_keeps_the_tail() {
        let store = InMemoryCheckpointer::new();
        for seq in 1..=4 {
            store.save(checkpoint("t", seq)).await.unwrap();
        }
        let deleted = store.delete("t", Some(3)).await.unwrap();
        assert_eq!(deleted, 2);
        let metas = store.list("t").await.unwrap();
        assert_eq!(metas.first().map(|m| m.seq), Some(3));
    }

    #[tokio::test]
    async fn cleanup_retains_most_recent() {
        let store = InMemoryCheckpointer::new();
        for seq in 1..=5 {
            store.save(checkpoint("t", seq)).await.unwrap();
        }
        let deleted = store.cleanup("t", 2).await.unwrap();
        assert_eq!(deleted, 3);
        let metas = store.list("t").await.unwrap();
        assert_eq!(metas.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn load_by_id_finds_mid_chain_checkpoints() {
        let store = InMemoryCheckpointer::new();
        let cp = checkpoint("t", 1);
        let id = cp.checkpoint_id.clone();
        store.save(cp).await.unwrap();
        store.save(checkpoint("t", 2)).await.unwrap();

        let found = store.load("t", &id).await.unwrap().unwrap();
        assert_eq!(found.seq, 1);
        assert!(store.load("t", "nope").await.unwrap().is_none());
    }
}
