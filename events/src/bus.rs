//! Copy-on-write fan-out event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conductor_contracts::{EventKind, KernelEvent};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<KernelEvent>,
}

/// The kernel's event bus. Cheap to clone; all clones share one
/// subscriber list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a new subscriber. Dropping the returned stream detaches
    /// it; the dead channel is pruned on the next publish.
    pub fn subscribe(&self) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = self.inner.subscribers.write();
            let mut next: Vec<Subscriber> = guard.iter().map(Subscriber::share).collect();
            next.push(Subscriber { id, sender });
            *guard = Arc::new(next);
        }
        EventStream { id, receiver }
    }

    /// Publish an event to every live subscriber. The payload was already
    /// sanitized by the [`KernelEvent`] constructor.
    pub fn publish(&self, event: KernelEvent) {
        let snapshot = self.inner.subscribers.read().clone();
        let mut dead: Vec<u64> = Vec::new();
        for subscriber in snapshot.iter() {
            if subscriber.sender.send(event.clone()).is_err() {
                dead.push(subscriber.id);
            }
        }
        if !dead.is_empty() {
            debug!(count = dead.len(), "pruning closed event subscribers");
            let mut guard = self.inner.subscribers.write();
            let next: Vec<Subscriber> = guard
                .iter()
                .filter(|s| !dead.contains(&s.id))
                .map(Subscriber::share)
                .collect();
            *guard = Arc::new(next);
        }
    }

    /// Convenience publish building the event in place.
    pub fn emit(&self, kind: EventKind, subject: impl Into<String>, payload: Value) {
        self.publish(KernelEvent::new(kind, subject, payload));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriber {
    fn share(&self) -> Subscriber {
        Subscriber {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

/// Receiving end of one subscription.
pub struct EventStream {
    #[allow(dead_code)]
    id: u64,
    receiver: mpsc::UnboundedReceiver<KernelEvent>,
}

impl EventStream {
    /// Await the next event; `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<KernelEvent> {
        self.receiver.recv().await
    }

    /// Pull everything already delivered without waiting.
    pub fn drain(&mut self) -> Vec<KernelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(EventKind::TaskSubmitted, "task_1", json!({"kind": "code"}));

        let a = first.next().await.unwrap();
        let b = second.next().await.unwrap();
        assert_eq!(a.kind, EventKind::TaskSubmitted);
        assert_eq!(b.subject, "task_1");
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(first);
        bus.emit(EventKind::TaskStarted, "task_1", json!({}));
        assert_eq!(bus.subscriber_count(), 1);

        let event = second.next().await.unwrap();
        assert_eq!(event.kind, EventKind::TaskStarted);
    }

    #[tokio::test]
    async fn a_full_mailbox_does_not_block_the_publisher_or_peers() {
        let bus = EventBus::new();
        // never drained
        let mut lagging = bus.subscribe();
        let mut live = bus.subscribe();

        for i in 0..1_000 {
            bus.emit(EventKind::ExecutionStarted, format!("agent-{i}"), json!({}));
        }
        assert_eq!(live.drain().len(), 1_000);
        assert_eq!(lagging.drain().len(), 1_000);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        bus.emit(EventKind::ExecutionStarted, "echo", json!({"seq": 1}));
        bus.emit(EventKind::ExecutionCompleted, "echo", json!({"seq": 2}));

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ExecutionStarted);
        assert_eq!(events[1].kind, EventKind::ExecutionCompleted);
        assert!(events[0].timestamp <= events[1].timestamp);
    }
}
