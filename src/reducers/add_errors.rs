use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::ExecutionState};

/// Appends delta error events to the errors channel, preserving order.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddErrors;

impl Reducer for AddErrors {
    fn apply(&self, state: &mut ExecutionState, update: &NodePartial) {
        if let Some(errors) = &update.errors
            && !errors.is_empty()
        {
            state.errors.get_mut().extend(errors.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::errors::{CauseChain, ErrorEvent};

    #[test]
    fn appends_error_events() {
        let mut state = ExecutionState::new_with_user_message("hi");
        let update = NodePartial::new().with_errors(vec![ErrorEvent::node(
            "worker",
            1,
            CauseChain::msg("transient failure"),
        )]);
        AddErrors.apply(&mut state, &update);
        assert_eq!(state.snapshot().errors.len(), 1);
    }
}
