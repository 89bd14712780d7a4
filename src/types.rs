//! Core identifier types for the relaygraph workflow engine.
//!
//! [`NodeKind`] identifies nodes in an execution graph and [`ChannelType`]
//! identifies the state channels that node output deltas are merged into.
//! Runtime identifiers (thread ids, checkpoint ids) live in
//! [`crate::runtime`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within an execution graph.
///
/// `Start` and `End` are virtual endpoints: they are never registered with
/// an executable implementation and never run. Every other node carries a
/// caller-chosen tag via `Custom`.
///
/// # Persistence
///
/// `NodeKind` supports serde as well as the stable
/// [`encode`](Self::encode)/[`decode`](Self::decode) string form used by
/// checkpoint stores.
///
/// # Examples
///
/// ```rust
/// use relaygraph::types::NodeKind;
///
/// let processor = NodeKind::Custom("planner".to_string());
/// let encoded = processor.encode();
/// assert_eq!(encoded, "Custom:planner");
/// assert_eq!(NodeKind::decode(&encoded), processor);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry endpoint. Has no implementation and no incoming edges.
    Start,

    /// Virtual terminal endpoint. Has no implementation and no outgoing edges.
    End,

    /// Custom node identified by a user-defined tag, unique per graph.
    Custom(String),
}

impl NodeKind {
    /// Encode a NodeKind into its persisted string form.
    ///
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `Custom("X")` → `"Custom:X"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a NodeKind.
    ///
    /// Unrecognized encodings fall back to `Custom(s)` so checkpoints
    /// written by newer versions still round-trip.
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    /// Returns `true` if this is the virtual [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is a custom node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// The bare tag of a custom node, or the endpoint name for Start/End.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            NodeKind::Start => "Start",
            NodeKind::End => "End",
            NodeKind::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

// Developer experience: allow using string literals where a NodeKind is expected.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

/// Identifies one of the state channels a node output delta can target.
///
/// Each channel type has its own registered merge strategy; see
/// [`crate::reducers::ReducerRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Conversation messages flowing through the workflow.
    Message,

    /// Error events and diagnostics collected during execution.
    Error,

    /// Custom key-value metadata and intermediate results.
    Extra,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Error => write!(f, "error"),
            Self::Extra => write!(f, "extra"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for kind in [
            NodeKind::Start,
            NodeKind::End,
            NodeKind::Custom("planner".into()),
        ] {
            assert_eq!(NodeKind::decode(&kind.encode()), kind);
        }
    }

    #[test]
    fn unknown_encoding_falls_back_to_custom() {
        assert_eq!(
            NodeKind::decode("legacy-node"),
            NodeKind::Custom("legacy-node".into())
        );
    }

    #[test]
    fn from_str_recognizes_virtual_endpoints() {
        assert_eq!(NodeKind::from("Start"), NodeKind::Start);
        assert_eq!(NodeKind::from("End"), NodeKind::End);
        assert_eq!(NodeKind::from("work"), NodeKind::Custom("work".into()));
    }
}
