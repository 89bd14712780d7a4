use std::io::{self, Result as IoResult, Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::event::Event;
use crate::telemetry::{PlainFormatter, TelemetryFormatter};

/// Abstraction over an output target that consumes full Event objects.
pub trait EventSink: Sync + Send {
    /// Handle a structured event. Sink decides how to serialize/format it.
    fn handle(&mut self, event: &Event) -> IoResult<()>;

    /// Whether the sink is done consuming events. The bus detaches finished
    /// sinks after each broadcast.
    fn finished(&self) -> bool {
        false
    }
}

/// Stdout sink with optional formatting.
pub struct StdOutSink<F: TelemetryFormatter = PlainFormatter> {
    handle: Stdout,
    formatter: F,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
            formatter: PlainFormatter::new(),
        }
    }
}

impl<F: TelemetryFormatter> StdOutSink<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self {
            handle: io::stdout(),
            formatter,
        }
    }
}

impl<F: TelemetryFormatter> EventSink for StdOutSink<F> {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        let rendered = self.formatter.render_event(event).join_lines();
        self.handle.write_all(rendered.as_bytes())?;
        self.handle.flush()
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Channel-based sink for streaming to async consumers.
///
/// Events are forwarded to a tokio mpsc channel without blocking. Streaming
/// invocations attach one of these and read events off the receiver until
/// the stream-end diagnostic arrives.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
    thread_id: Option<String>,
    done: bool,
}

impl ChannelSink {
    /// Unscoped sink: forwards every bus event for as long as the receiver
    /// is held.
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            tx,
            thread_id: None,
            done: false,
        }
    }

    /// Sink scoped to one invocation: forwards only events attributed to
    /// `thread_id` and detaches itself after that thread's stream-end, so a
    /// held receiver never observes other threads' events.
    pub fn for_thread(tx: mpsc::UnboundedSender<Event>, thread_id: impl Into<String>) -> Self {
        Self {
            tx,
            thread_id: Some(thread_id.into()),
            done: false,
        }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        if self.done {
            return Ok(());
        }
        if let Some(thread) = &self.thread_id
            && event.thread_id() != Some(thread.as_str())
        {
            return Ok(());
        }
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))?;
        if self.thread_id.is_some() && event.is_stream_end() {
            self.done = true;
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.done || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_captures_and_clears() {
        let mut sink = MemorySink::new();
        sink.handle(&Event::diagnostic("scope", "msg")).unwrap();
        assert_eq!(sink.snapshot().len(), 1);
        sink.clear();
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        sink.handle(&Event::diagnostic("scope", "hello")).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message(), "hello");
    }

    #[tokio::test]
    async fn channel_sink_errors_after_receiver_drop() {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert!(sink.handle(&Event::diagnostic("scope", "x")).is_err());
        assert!(sink.finished());
    }

    #[tokio::test]
    async fn thread_scoped_sink_filters_and_detaches() {
        use crate::event_bus::event::StepEvent;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::for_thread(tx, "a");

        let other = Event::Step(StepEvent {
            thread_id: "b".into(),
            step: 1,
            node: "Custom:x".into(),
            next: "End".into(),
            duration_ms: 0,
        });
        sink.handle(&other).unwrap();
        sink.handle(&Event::stream_end("b", "not ours")).unwrap();
        assert!(!sink.finished());

        sink.handle(&Event::stream_end("a", "done")).unwrap();
        assert!(sink.finished());
        sink.handle(&Event::stream_end("a", "ignored once done")).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.is_stream_end());
        assert_eq!(first.thread_id(), Some("a"));
        assert!(rx.try_recv().is_err());
    }
}
