//! Versioned state channels.
//!
//! Each channel pairs a payload with a monotonically increasing version
//! number. Versions are bumped by the merge barrier when a step actually
//! changed a channel, which gives checkpoint consumers a cheap change
//! detector without diffing payloads.

pub mod errors;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::channels::errors::ErrorEvent;
use crate::message::Message;

/// Common behavior of a versioned channel.
///
/// A channel owns its payload; mutation goes through [`get_mut`](Channel::get_mut)
/// and version bumps are explicit via [`bump_version`](Channel::bump_version).
pub trait Channel {
    type Payload;

    /// Borrow the payload immutably.
    fn get(&self) -> &Self::Payload;

    /// Borrow the payload mutably. Does not touch the version.
    fn get_mut(&mut self) -> &mut Self::Payload;

    /// Clone the payload out of the channel.
    fn snapshot(&self) -> Self::Payload
    where
        Self::Payload: Clone,
    {
        self.get().clone()
    }

    /// Current version number. Starts at 1 for a freshly built state.
    fn version(&self) -> u32;

    /// Increment the version by one.
    fn bump_version(&mut self);
}

macro_rules! versioned_channel {
    ($(#[$meta:meta])* $name:ident, $payload:ty, $default_version:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            payload: $payload,
            version: u32,
        }

        impl $name {
            /// Construct a channel with an explicit payload and version.
            #[must_use]
            pub fn new(payload: $payload, version: u32) -> Self {
                Self { payload, version }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    payload: Default::default(),
                    version: $default_version,
                }
            }
        }

        impl Channel for $name {
            type Payload = $payload;

            fn get(&self) -> &Self::Payload {
                &self.payload
            }

            fn get_mut(&mut self) -> &mut Self::Payload {
                &mut self.payload
            }

            fn version(&self) -> u32 {
                self.version
            }

            fn bump_version(&mut self) {
                self.version += 1;
            }
        }
    };
}

versioned_channel!(
    /// Append-only conversation history.
    MessagesChannel,
    Vec<Message>,
    1
);

versioned_channel!(
    /// Keyed metadata and intermediate results, merged per key.
    ExtrasChannel,
    FxHashMap<String, Value>,
    1
);

versioned_channel!(
    /// Append-only error events collected during execution.
    ErrorsChannel,
    Vec<ErrorEvent>,
    1
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channels_start_at_version_one() {
        assert_eq!(MessagesChannel::default().version(), 1);
        assert_eq!(ExtrasChannel::default().version(), 1);
        assert_eq!(ErrorsChannel::default().version(), 1);
    }

    #[test]
    fn bump_version_increments() {
        let mut channel = MessagesChannel::default();
        channel.bump_version();
        channel.bump_version();
        assert_eq!(channel.version(), 3);
    }

    #[test]
    fn snapshot_is_independent_of_channel() {
        let mut channel = MessagesChannel::new(vec![Message::user("hi")], 1);
        let snap = channel.snapshot();
        channel.get_mut().clear();
        assert_eq!(snap.len(), 1);
        assert!(channel.get().is_empty());
    }
}
