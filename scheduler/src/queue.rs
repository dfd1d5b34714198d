//! Bounded priority deque with stable FIFO ordering within a priority.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use conductor_contracts::{AgentError, ErrorKind, TaskPriority, TaskRequest};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One queued submission.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: String,
    pub request: TaskRequest,
    pub priority: TaskPriority,
    pub submitted_at: DateTime<Utc>,
}

struct QueueCore {
    deque: VecDeque<QueuedTask>,
    bound: usize,
    closed: bool,
}

/// Mutex-guarded deque with a notify wake for the consumer, per the
/// single-consumer discipline of the scheduler.
pub struct TaskQueue {
    core: Mutex<QueueCore>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            core: Mutex::new(QueueCore {
                deque: VecDeque::new(),
                bound: bound.max(1),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a task just before the first queued task of strictly lower
    /// priority, preserving submission order within each priority.
    pub fn push(&self, task: QueuedTask) -> Result<(), AgentError> {
        {
            let mut core = self.core.lock();
            if core.closed {
                return Err(AgentError::new(
                    "scheduler_stopped",
                    "the scheduler is no longer accepting submissions",
                    ErrorKind::Execution,
                ));
            }
            if core.deque.len() >= core.bound {
                return Err(AgentError::new(
                    "queue_full",
                    format!("task queue is at its bound of {}", core.bound),
                    ErrorKind::Temporary,
                ));
            }
            let position = core
                .deque
                .iter()
                .position(|queued| queued.priority < task.priority)
                .unwrap_or(core.deque.len());
            core.deque.insert(position, task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the head, waiting until a task arrives or the queue is closed
    /// and drained.
    pub async fn pop_wait(&self) -> Option<QueuedTask> {
        loop {
            let notified = self.notify.notified();
            {
                let mut core = self.core.lock();
                if let Some(task) = core.deque.pop_front() {
                    return Some(task);
                }
                if core.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Remove a task that is still queued.
    pub fn cancel(&self, id: &str) -> Option<QueuedTask> {
        let mut core = self.core.lock();
        let position = core.deque.iter().position(|queued| queued.id == id)?;
        core.deque.remove(position)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.core.lock().deque.iter().any(|queued| queued.id == id)
    }

    pub fn depth(&self) -> usize {
        self.core.lock().deque.len()
    }

    pub fn bound(&self) -> usize {
        self.core.lock().bound
    }

    /// Adjust the bound. Applies to future submissions only; an
    /// over-full queue drains naturally.
    pub fn set_bound(&self, bound: usize) {
        self.core.lock().bound = bound.max(1);
    }

    /// Stop accepting submissions and wake the consumer so it can drain
    /// and exit.
    pub fn close(&self) {
        self.core.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.core.lock().closed
    }
}
