//! Versioned workflow state.
//!
//! State is organized into three channels, each independently versioned:
//!
//! - **messages**: conversation messages ([`MessagesChannel`])
//! - **extra**: custom metadata and intermediate results ([`ExtrasChannel`])
//! - **errors**: error events and diagnostics ([`ErrorsChannel`])
//!
//! Nodes never see the live state. Each step hands the node an immutable
//! [`StateSnapshot`]; the deltas the node returns are merged back through
//! the reducer barrier, which is also the only place channel versions bump.
//!
//! # Examples
//!
//! ```rust
//! use relaygraph::state::ExecutionState;
//! use relaygraph::channels::Channel;
//! use serde_json::json;
//!
//! let mut state = ExecutionState::new_with_user_message("Hello, world!");
//! state.extra.get_mut().insert("user_id".to_string(), json!("user123"));
//!
//! let snapshot = state.snapshot();
//! assert_eq!(snapshot.messages.len(), 1);
//! assert_eq!(snapshot.extra.get("user_id"), Some(&json!("user123")));
//! ```

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::{
    channels::{Channel, ErrorsChannel, ExtrasChannel, MessagesChannel, errors::ErrorEvent},
    message::Message,
};

/// The main state container for workflow execution.
///
/// Each channel maintains its own version number for change detection; a
/// version only moves when the merge barrier applied a delta to that channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionState {
    /// Message channel containing conversation data.
    pub messages: MessagesChannel,
    /// Extra channel for custom metadata and intermediate results.
    pub extra: ExtrasChannel,
    /// Error channel for diagnostic information.
    pub errors: ErrorsChannel,
}

/// Immutable snapshot of workflow state at a specific point in time.
///
/// Snapshots are value copies: hooks, triggers, and nodes can read them
/// freely while the engine mutates the live [`ExecutionState`] behind the
/// barrier.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    /// Messages at the time of snapshot.
    pub messages: Vec<Message>,
    /// Version of the messages channel when the snapshot was taken.
    pub messages_version: u32,
    /// Extra data at the time of snapshot.
    pub extra: FxHashMap<String, Value>,
    /// Version of the extra channel when the snapshot was taken.
    pub extra_version: u32,
    /// Error events at the time of snapshot.
    pub errors: Vec<ErrorEvent>,
    /// Version of the errors channel when the snapshot was taken.
    pub errors_version: u32,
}

impl StateSnapshot {
    /// The content of the most recent message, if any.
    #[must_use]
    pub fn latest_message_text(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}

impl ExecutionState {
    /// Creates a state seeded with a single user message.
    ///
    /// All channels start at version 1.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relaygraph::state::ExecutionState;
    ///
    /// let state = ExecutionState::new_with_user_message("Analyze this data");
    /// let snapshot = state.snapshot();
    /// assert_eq!(snapshot.messages[0].role, "user");
    /// assert_eq!(snapshot.messages_version, 1);
    /// ```
    #[must_use]
    pub fn new_with_user_message(user_text: &str) -> Self {
        Self {
            messages: MessagesChannel::new(vec![Message::user(user_text)], 1),
            extra: ExtrasChannel::default(),
            errors: ErrorsChannel::default(),
        }
    }

    /// Creates a state seeded with an existing message history.
    #[must_use]
    pub fn new_with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: MessagesChannel::new(messages, 1),
            extra: ExtrasChannel::default(),
            errors: ErrorsChannel::default(),
        }
    }

    /// Fluent builder for states with custom initial data.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relaygraph::state::ExecutionState;
    /// use serde_json::json;
    ///
    /// let state = ExecutionState::builder()
    ///     .with_user_message("Hello, assistant!")
    ///     .with_extra("session_id", json!("session_123"))
    ///     .build();
    /// let snapshot = state.snapshot();
    /// assert_eq!(snapshot.messages.len(), 1);
    /// assert_eq!(snapshot.extra.len(), 1);
    /// ```
    #[must_use]
    pub fn builder() -> ExecutionStateBuilder {
        ExecutionStateBuilder::default()
    }

    /// Appends a message without bumping the channel version.
    ///
    /// Version bumps belong to the merge barrier; this is for seeding and
    /// restore paths.
    pub fn add_message(&mut self, role: &str, content: &str) -> &mut Self {
        self.messages.get_mut().push(Message::new(role, content));
        self
    }

    /// Inserts an extra entry without bumping the channel version.
    pub fn add_extra(&mut self, key: &str, value: Value) -> &mut Self {
        self.extra.get_mut().insert(key.to_string(), value);
        self
    }

    /// Creates an immutable point-in-time copy of all channels.
    ///
    /// Clones all channel data; O(n) in state size.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            messages: self.messages.snapshot(),
            messages_version: self.messages.version(),
            extra: self.extra.snapshot(),
            extra_version: self.extra.version(),
            errors: self.errors.snapshot(),
            errors_version: self.errors.version(),
        }
    }
}

/// Builder for [`ExecutionState`] with custom initial messages and metadata.
#[derive(Debug, Default)]
pub struct ExecutionStateBuilder {
    messages: Vec<Message>,
    extra: FxHashMap<String, Value>,
}

impl ExecutionStateBuilder {
    /// Adds a user message.
    #[must_use]
    pub fn with_user_message(mut self, content: &str) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    /// Adds an assistant message.
    #[must_use]
    pub fn with_assistant_message(mut self, content: &str) -> Self {
        self.messages.push(Message::assistant(content));
        self
    }

    /// Adds a system message.
    #[must_use]
    pub fn with_system_message(mut self, content: &str) -> Self {
        self.messages.push(Message::system(content));
        self
    }

    /// Adds a message with an arbitrary role.
    #[must_use]
    pub fn with_message(mut self, role: &str, content: &str) -> Self {
        self.messages.push(Message::new(role, content));
        self
    }

    /// Inserts an extra entry.
    #[must_use]
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Builds the state. All channels start at version 1.
    #[must_use]
    pub fn build(self) -> ExecutionState {
        ExecutionState {
            messages: MessagesChannel::new(self.messages, 1),
            extra: ExtrasChannel::new(self.extra, 1),
            errors: ErrorsChannel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_is_independent_of_state() {
        let mut state = ExecutionState::new_with_user_message("Hello");
        state.add_extra("key", json!("value"));

        let snapshot = state.snapshot();
        state.extra.get_mut().clear();

        assert_eq!(snapshot.extra.get("key"), Some(&json!("value")));
        assert!(state.extra.snapshot().is_empty());
    }

    #[test]
    fn builder_seeds_all_channels_at_version_one() {
        let state = ExecutionState::builder()
            .with_system_message("Session started")
            .with_user_message("Hello")
            .with_extra("priority", json!("high"))
            .build();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages_version, 1);
        assert_eq!(snapshot.extra_version, 1);
        assert_eq!(snapshot.errors_version, 1);
    }

    #[test]
    fn latest_message_text_reads_the_tail() {
        let state = ExecutionState::builder()
            .with_user_message("first")
            .with_assistant_message("second")
            .build();
        assert_eq!(state.snapshot().latest_message_text(), Some("second"));
    }
}
