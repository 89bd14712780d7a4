//! Event bus: producers push [`Event`]s over a flume channel; a listener
//! task fans them out to the configured [`EventSink`]s. Streaming execution
//! attaches a [`ChannelSink`] per invocation.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{DiagnosticEvent, Event, NodeEvent, STREAM_END_SCOPE, StepEvent, TriggerEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
