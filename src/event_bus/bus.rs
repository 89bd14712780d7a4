use std::sync::{Arc, Mutex};
use tokio::{sync::oneshot, task};

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Receives events from producers and broadcasts them to all attached sinks.
///
/// Producers hold a cheap flume sender clone; a background listener task
/// drains the channel and fans events out. The listener is started lazily
/// with [`listen_for_events`](EventBus::listen_for_events).
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    event_channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Arc<Mutex<Option<ListenerState>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Create an EventBus with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create an EventBus with multiple sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            event_channel: flume::unbounded(),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Dynamically add a sink (used for per-invocation streaming).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(Box::new(sink));
        }
    }

    /// Clone of the sender side so producers can emit events.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.event_channel.0.clone()
    }

    /// Number of currently attached sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Spawn the background listener that broadcasts events to all sinks.
    /// Idempotent: calling multiple times has no effect.
    pub fn listen_for_events(&self) {
        let Ok(mut guard) = self.listener.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        let receiver = self.event_channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let Ok(mut sinks_guard) = sinks.lock() else { break };
                            for sink in sinks_guard.iter_mut() {
                                if let Err(e) = sink.handle(&event) {
                                    tracing::warn!(error = %e, "event sink failed");
                                }
                            }
                            // Detach sinks that are done, e.g. a streaming
                            // sink past its stream-end or one whose receiver
                            // was dropped.
                            sinks_guard.retain(|sink| !sink.finished());
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background listener task and wait for it to drain.
    pub async fn stop_listener(&self) {
        let state = {
            let Ok(mut guard) = self.listener.lock() else {
                return;
            };
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock()
            && let Some(state) = guard.take()
        {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::sink::MemorySink;

    #[tokio::test]
    async fn broadcasts_to_memory_sink() {
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen_for_events();

        let sender = bus.get_sender();
        sender.send(Event::diagnostic("test", "one")).unwrap();
        sender.send(Event::diagnostic("test", "two")).unwrap();

        // Give the listener a chance to drain before stopping.
        drop(sender);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.stop_listener().await;

        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message(), "one");
    }

    #[tokio::test]
    async fn listen_is_idempotent() {
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen_for_events();
        bus.listen_for_events();

        bus.get_sender()
            .send(Event::diagnostic("test", "only once"))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.stop_listener().await;

        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn finished_sinks_are_detached_after_broadcast() {
        use crate::event_bus::sink::ChannelSink;

        let bus = EventBus::with_sink(MemorySink::new());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        bus.add_sink(ChannelSink::new(tx));
        drop(rx);
        assert_eq!(bus.sink_count(), 2);

        bus.listen_for_events();
        bus.get_sender().send(Event::diagnostic("test", "x")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.stop_listener().await;

        assert_eq!(bus.sink_count(), 1);
    }
}
