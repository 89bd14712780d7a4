use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::ExecutionState};

/// Appends delta messages to the messages channel, preserving order.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddMessages;

impl Reducer for AddMessages {
    fn apply(&self, state: &mut ExecutionState, update: &NodePartial) {
        if let Some(messages) = &update.messages
            && !messages.is_empty()
        {
            state.messages.get_mut().extend(messages.iter().cloned());
        }
    }
}
