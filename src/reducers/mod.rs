//! Channel merge strategies.
//!
//! A [`Reducer`] folds a [`NodePartial`] delta into the live
//! [`ExecutionState`]. The defaults match the channel contracts: messages
//! append, errors append, extras merge per key under a configurable
//! [`MergePolicy`]. The [`ReducerRegistry`] is the merge barrier itself:
//! it routes deltas to the reducers registered per channel and bumps the
//! channel version exactly once per applied delta.

mod add_errors;
mod add_messages;
mod map_merge;
mod reducer_registry;

pub use add_errors::AddErrors;
pub use add_messages::AddMessages;
pub use map_merge::{MapMerge, MergePolicy, ValueReducer};
pub use reducer_registry::ReducerRegistry;

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodePartial;
use crate::state::ExecutionState;
use crate::types::ChannelType;

/// Unified reducer trait: every reducer mutates `ExecutionState` using a
/// `NodePartial` delta.
pub trait Reducer: Send + Sync {
    fn apply(&self, state: &mut ExecutionState, update: &NodePartial);
}

/// Errors raised while applying deltas at the merge barrier.
#[derive(Debug, Error, Diagnostic)]
pub enum ReducerError {
    #[error("no reducers registered for channel: {0}")]
    #[diagnostic(
        code(relaygraph::reducers::unknown_channel),
        help("Register a reducer for this channel or use ReducerRegistry::default().")
    )]
    UnknownChannel(ChannelType),

    #[error("reducer apply failed for channel {channel}: {message}")]
    #[diagnostic(code(relaygraph::reducers::apply))]
    Apply {
        channel: ChannelType,
        message: String,
    },
}
