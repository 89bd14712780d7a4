use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::{
    channels::Channel,
    node::NodePartial,
    reducers::{AddErrors, AddMessages, MapMerge, Reducer, ReducerError},
    state::ExecutionState,
    types::ChannelType,
};
use tracing::instrument;

/// The merge barrier: routes each delta to the reducers registered for its
/// channel and bumps the channel version once per applied delta.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducer_map: FxHashMap<ChannelType, Vec<Arc<dyn Reducer>>>,
}

/// Whether a NodePartial carries meaningful data for the given channel.
/// Lets the registry skip reducers (and version bumps) when there is
/// nothing to do.
fn channel_guard(channel: &ChannelType, partial: &NodePartial) -> bool {
    match channel {
        ChannelType::Message => partial.messages.as_ref().is_some_and(|v| !v.is_empty()),
        ChannelType::Extra => partial.extra.as_ref().is_some_and(|m| !m.is_empty()),
        ChannelType::Error => partial.errors.as_ref().is_some_and(|v| !v.is_empty()),
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(ChannelType::Message, Arc::new(AddMessages))
            .register(ChannelType::Extra, Arc::new(MapMerge::new()))
            .register(ChannelType::Error, Arc::new(AddErrors));
        registry
    }
}

impl ReducerRegistry {
    /// Creates an empty registry with no reducers registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reducer_map: FxHashMap::default(),
        }
    }

    /// Registers a reducer for a channel. Multiple reducers on the same
    /// channel apply in registration order.
    pub fn register(&mut self, channel: ChannelType, reducer: Arc<dyn Reducer>) -> &mut Self {
        self.reducer_map.entry(channel).or_default().push(reducer);
        self
    }

    /// Builder-style registration.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use relaygraph::reducers::{ReducerRegistry, AddMessages};
    /// use relaygraph::types::ChannelType;
    ///
    /// let registry = ReducerRegistry::new()
    ///     .with_reducer(ChannelType::Message, Arc::new(AddMessages));
    /// ```
    #[must_use]
    pub fn with_reducer(mut self, channel: ChannelType, reducer: Arc<dyn Reducer>) -> Self {
        self.register(channel, reducer);
        self
    }

    /// Applies a delta to one channel and bumps its version if the delta
    /// carried data for it.
    #[instrument(skip(self, state, to_update), err)]
    pub fn try_update(
        &self,
        channel_type: ChannelType,
        state: &mut ExecutionState,
        to_update: &NodePartial,
    ) -> Result<(), ReducerError> {
        if !channel_guard(&channel_type, to_update) {
            return Ok(());
        }

        let Some(reducers) = self.reducer_map.get(&channel_type) else {
            return Err(ReducerError::UnknownChannel(channel_type));
        };
        for reducer in reducers {
            reducer.apply(state, to_update);
        }
        match channel_type {
            ChannelType::Message => state.messages.bump_version(),
            ChannelType::Extra => state.extra.bump_version(),
            ChannelType::Error => state.errors.bump_version(),
        }
        Ok(())
    }

    /// Applies a merged delta to every channel it carries data for.
    ///
    /// A channel with data but no registered reducer is logged and skipped;
    /// the write is lost but never silently.
    #[instrument(skip(self, state, merged_updates), err)]
    pub fn apply_all(
        &self,
        state: &mut ExecutionState,
        merged_updates: &NodePartial,
    ) -> Result<(), ReducerError> {
        for channel in [ChannelType::Message, ChannelType::Extra, ChannelType::Error] {
            if !channel_guard(&channel, merged_updates) {
                continue;
            }
            if self.reducer_map.contains_key(&channel) {
                self.try_update(channel, state, merged_updates)?;
            } else {
                tracing::warn!(%channel, "dropping delta for channel with no registered reducer");
            }
        }
        Ok(())
    }
}
