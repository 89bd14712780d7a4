use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::ExecutionState};

/// Custom merge function for a single extras key.
///
/// Receives the existing value (if any) and the incoming delta value and
/// produces the value to store. Implementations must be deterministic so
/// that replaying a checkpointed thread reproduces the same state.
pub trait ValueReducer: Send + Sync {
    fn merge(&self, existing: Option<&Value>, incoming: &Value) -> Value;
}

impl<F> ValueReducer for F
where
    F: Fn(Option<&Value>, &Value) -> Value + Send + Sync,
{
    fn merge(&self, existing: Option<&Value>, incoming: &Value) -> Value {
        self(existing, incoming)
    }
}

/// How an extras key is merged when a delta collides with an existing value.
#[derive(Clone)]
pub enum MergePolicy {
    /// Replace the existing value. The default for unregistered keys.
    Overwrite,
    /// Treat the key as a JSON array and append the incoming value. A
    /// non-array existing value is promoted to a one-element array first.
    Append,
    /// Delegate to a caller-supplied merge function.
    Custom(Arc<dyn ValueReducer>),
}

impl std::fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => write!(f, "Overwrite"),
            Self::Append => write!(f, "Append"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Shallow per-key merge into the extras channel.
///
/// Keys without a registered policy are overwritten. Policies are fixed at
/// graph build time, so merge behavior cannot drift mid-run.
#[derive(Clone, Debug, Default)]
pub struct MapMerge {
    policies: FxHashMap<String, MergePolicy>,
}

impl MapMerge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a merge policy for one key.
    #[must_use]
    pub fn with_policy(mut self, key: impl Into<String>, policy: MergePolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    fn merge_one(&self, existing: Option<&Value>, key: &str, incoming: &Value) -> Value {
        match self.policies.get(key) {
            None | Some(MergePolicy::Overwrite) => incoming.clone(),
            Some(MergePolicy::Append) => {
                let mut items = match existing {
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => vec![other.clone()],
                    None => Vec::new(),
                };
                items.push(incoming.clone());
                Value::Array(items)
            }
            Some(MergePolicy::Custom(reducer)) => reducer.merge(existing, incoming),
        }
    }
}

impl Reducer for MapMerge {
    fn apply(&self, state: &mut ExecutionState, update: &NodePartial) {
        if let Some(extras_update) = &update.extra
            && !extras_update.is_empty()
        {
            let state_map = state.extra.get_mut();
            for (k, v) in extras_update {
                let merged = self.merge_one(state_map.get(k), k, v);
                state_map.insert(k.clone(), merged);
            }
        }
    }
}
