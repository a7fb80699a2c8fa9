//! Event dispatch bus
//!
//! Topic-based synchronous publish/subscribe. All events are delivered on
//! one dedicated dispatch thread, which is what gives every sink the same
//! Start < Data < Stop ordering without per-sink locks: publishes for one
//! stream serialize through the thread's rendezvous channel.
//!
//! A publish the dispatcher cannot accept within its timeout (a prior
//! handler still running, typically) is dropped for all handlers of that
//! occurrence. There is no partial or retried delivery.

use crate::capture::{StreamEvent, StreamKind};
use crate::error::BusError;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Grace period for a delivery in progress after the dispatcher has
/// accepted an event. On expiry the publisher proceeds; the claim
/// guards keep slot reuse safe regardless.
const ACK_GRACE: Duration = Duration::from_secs(1);

type Handler = dyn Fn(&StreamEvent) + Send + Sync;

struct Entry {
    id: u64,
    tag: String,
    handler: Box<Handler>,
}

struct Job {
    topic: StreamKind,
    event: StreamEvent,
    ack: Sender<()>,
}

/// Opaque registration handle returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkHandle {
    topic: StreamKind,
    id: u64,
}

type Registry = HashMap<StreamKind, Vec<Arc<Entry>>>;

pub struct EventBus {
    tx: Sender<Job>,
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create the bus and spawn its dispatch thread.
    pub fn new() -> Arc<Self> {
        // Zero capacity: acceptance rendezvouses with the dispatcher, so
        // a busy handler shows up as a publish timeout at the producer.
        let (tx, rx) = bounded::<Job>(0);
        let registry: Arc<Mutex<Registry>> = Arc::new(Mutex::new(HashMap::new()));

        let dispatch_registry = Arc::clone(&registry);
        thread::Builder::new()
            .name("avc-dispatch".into())
            .spawn(move || dispatch_loop(rx, dispatch_registry))
            .expect("failed to spawn dispatch thread");

        Arc::new(Self {
            tx,
            registry,
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a handler for a topic. Idempotent per `(topic, tag)`:
    /// attaching the same kind of sink twice returns the existing handle.
    pub fn register<F>(&self, topic: StreamKind, tag: &str, handler: F) -> SinkHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        let entries = registry.entry(topic).or_default();
        if let Some(existing) = entries.iter().find(|e| e.tag == tag) {
            tracing::debug!("Sink '{}' already attached to {}", tag, topic);
            return SinkHandle {
                topic,
                id: existing.id,
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push(Arc::new(Entry {
            id,
            tag: tag.to_string(),
            handler: Box::new(handler),
        }));
        tracing::debug!("Sink '{}' attached to {} (id={})", tag, topic, id);
        SinkHandle { topic, id }
    }

    /// Remove one registration. Unknown handles are ignored.
    pub fn unregister(&self, handle: SinkHandle) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(entries) = registry.get_mut(&handle.topic) {
            entries.retain(|e| e.id != handle.id);
        }
    }

    /// Remove every registration for a topic (pipeline shutdown).
    pub fn unregister_topic(&self, topic: StreamKind) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(entries) = registry.remove(&topic) {
            if !entries.is_empty() {
                tracing::debug!("Detached {} sink(s) from {}", entries.len(), topic);
            }
        }
    }

    /// Number of sinks currently attached to a topic.
    pub fn sink_count(&self, topic: StreamKind) -> usize {
        self.registry
            .lock()
            .unwrap()
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Deliver one event to every handler of `topic`, in registration
    /// order, on the dispatch thread. Returns once delivery completes.
    pub fn publish(
        &self,
        topic: StreamKind,
        event: StreamEvent,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let (ack_tx, ack_rx) = bounded::<()>(1);
        let job = Job {
            topic,
            event,
            ack: ack_tx,
        };
        self.tx.send_timeout(job, timeout).map_err(|e| match e {
            crossbeam_channel::SendTimeoutError::Timeout(_) => {
                BusError::Timeout(timeout.as_millis() as u64)
            }
            crossbeam_channel::SendTimeoutError::Disconnected(_) => BusError::Closed,
        })?;
        // Accepted: wait for the handler chain, failing open if a sink
        // stalls far past its budget.
        if ack_rx.recv_timeout(ACK_GRACE).is_err() {
            tracing::warn!("Dispatch of {} event still running after grace period", topic);
        }
        Ok(())
    }
}

fn dispatch_loop(rx: Receiver<Job>, registry: Arc<Mutex<Registry>>) {
    while let Ok(job) = rx.recv() {
        // Snapshot under the lock, deliver outside it, so attach and
        // detach calls from other threads never race a live dispatch.
        let entries: Vec<Arc<Entry>> = registry
            .lock()
            .unwrap()
            .get(&job.topic)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        for entry in entries {
            let claim = job.event.claim();
            let result = catch_unwind(AssertUnwindSafe(|| (entry.handler)(&job.event)));
            drop(claim);
            if result.is_err() {
                tracing::error!("Sink '{}' panicked on {} event", entry.tag, job.topic);
            }
        }
        let _ = job.ack.send(());
    }
    tracing::debug!("Dispatch thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AudioMode, CaptureMode, EventKind};
    use crate::sync::DrainBarrier;
    use std::sync::atomic::AtomicUsize;

    fn test_event(seq: u64, kind: EventKind, payload: Vec<u8>) -> StreamEvent {
        let mode = Arc::new(CaptureMode::Audio(AudioMode {
            sample_rate: 16000,
            channels: 1,
            sample_bytes: 2,
        }));
        let len = payload.len();
        StreamEvent::new(seq, kind, mode, Arc::new(payload), len, DrainBarrier::new())
    }

    #[test]
    fn test_registration_is_idempotent_per_tag() {
        let bus = EventBus::new();
        let h1 = bus.register(StreamKind::Audio, "visual", |_| {});
        let h2 = bus.register(StreamKind::Audio, "visual", |_| {});
        assert_eq!(h1, h2);
        assert_eq!(bus.sink_count(StreamKind::Audio), 1);

        let h3 = bus.register(StreamKind::Audio, "forward", |_| {});
        assert_ne!(h1, h3);
        assert_eq!(bus.sink_count(StreamKind::Audio), 2);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.register(StreamKind::Audio, "first", move |_| {
            o1.lock().unwrap().push("first")
        });
        let o2 = Arc::clone(&order);
        bus.register(StreamKind::Audio, "second", move |_| {
            o2.lock().unwrap().push("second")
        });

        bus.publish(
            StreamKind::Audio,
            test_event(0, EventKind::Data, vec![0; 4]),
            Duration::from_millis(100),
        )
        .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.register(StreamKind::Video, "counter", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(
            StreamKind::Audio,
            test_event(0, EventKind::Data, vec![]),
            Duration::from_millis(100),
        )
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_publish_times_out_while_handler_runs() {
        let bus = EventBus::new();
        bus.register(StreamKind::Audio, "slow", |_| {
            thread::sleep(Duration::from_millis(200));
        });

        let bus2 = Arc::clone(&bus);
        let first = thread::spawn(move || {
            bus2.publish(
                StreamKind::Audio,
                test_event(0, EventKind::Data, vec![]),
                Duration::from_millis(500),
            )
        });

        // Let the slow handler start, then race a second publish into it.
        thread::sleep(Duration::from_millis(50));
        let result = bus.publish(
            StreamKind::Audio,
            test_event(1, EventKind::Data, vec![]),
            Duration::from_millis(20),
        );
        assert_eq!(result, Err(BusError::Timeout(20)));
        first.join().unwrap().unwrap();
    }

    #[test]
    fn test_panicking_sink_does_not_kill_the_bus() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.register(StreamKind::Audio, "bad", |_| panic!("sink bug"));
        let h = Arc::clone(&hits);
        bus.register(StreamKind::Audio, "good", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        for seq in 0..3 {
            bus.publish(
                StreamKind::Audio,
                test_event(seq, EventKind::Data, vec![]),
                Duration::from_millis(100),
            )
            .unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unregister_topic_detaches_everything() {
        let bus = EventBus::new();
        bus.register(StreamKind::Audio, "a", |_| {});
        bus.register(StreamKind::Audio, "b", |_| {});
        bus.unregister_topic(StreamKind::Audio);
        assert_eq!(bus.sink_count(StreamKind::Audio), 0);
    }
}
