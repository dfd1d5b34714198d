//! Test-oriented event collector.

use std::time::Duration;

use conductor_contracts::{EventKind, KernelEvent};

use crate::bus::{EventBus, EventStream};

/// Buffers every event published after attachment. Intended for tests and
/// diagnostics; production consumers should subscribe directly.
pub struct EventCollector {
    stream: EventStream,
    seen: Vec<KernelEvent>,
}

impl EventCollector {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            stream: bus.subscribe(),
            seen: Vec::new(),
        }
    }

    /// Pull everything delivered so far into the buffer and return a view.
    pub fn events(&mut self) -> &[KernelEvent] {
        self.seen.extend(self.stream.drain());
        &self.seen
    }

    /// Events of one kind, in arrival order.
    pub fn of_kind(&mut self, kind: EventKind) -> Vec<KernelEvent> {
        self.events()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&mut self, kind: EventKind) -> usize {
        self.of_kind(kind).len()
    }

    /// Await until at least `n` events of `kind` have arrived, bounded by
    /// `timeout`.
    pub async fn wait_for(&mut self, kind: EventKind, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(kind) >= n {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Ok(Some(event)) => self.seen.push(event),
                Ok(None) => return self.count(kind) >= n,
                Err(_) => return false,
            }
        }
    }
}
