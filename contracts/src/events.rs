//! Lifecycle events published on the in-process bus.
//!
//! The tag set is closed: subscribers can rely on exhaustively matching
//! [`EventKind`]. Payloads are sanitized at construction so sensitive
//! input fields never reach a subscriber or a log line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sanitize::sanitize_value;

/// The closed set of event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    TaskSubmitted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionError,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    BreakerOpened,
    BreakerHalfOpen,
    BreakerClosed,
    HealthChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskSubmitted => "taskSubmitted",
            EventKind::TaskStarted => "taskStarted",
            EventKind::TaskCompleted => "taskCompleted",
            EventKind::TaskFailed => "taskFailed",
            EventKind::TaskCancelled => "taskCancelled",
            EventKind::ExecutionStarted => "executionStarted",
            EventKind::ExecutionCompleted => "executionCompleted",
            EventKind::ExecutionError => "executionError",
            EventKind::WorkflowStarted => "workflowStarted",
            EventKind::WorkflowCompleted => "workflowCompleted",
            EventKind::WorkflowFailed => "workflowFailed",
            EventKind::BreakerOpened => "breakerOpened",
            EventKind::BreakerHalfOpen => "breakerHalfOpen",
            EventKind::BreakerClosed => "breakerClosed",
            EventKind::HealthChanged => "healthChanged",
        }
    }
}

/// One published event. `subject` names the agent, workflow, or task the
/// event is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub subject: String,
    pub payload: Value,
}

impl KernelEvent {
    /// Build an event, redacting sensitive fields from the payload.
    pub fn new(kind: EventKind, subject: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
            payload: sanitize_value(&payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_tags_serialize_camel_case() {
        let json = serde_json::to_string(&EventKind::ExecutionStarted).unwrap();
        assert_eq!(json, "\"executionStarted\"");
        assert_eq!(EventKind::BreakerHalfOpen.as_str(), "breakerHalfOpen");
    }

    #[test]
    fn payload_is_redacted_at_construction() {
        let event = KernelEvent::new(
            EventKind::ExecutionStarted,
            "echo",
            json!({"msg": "hi", "apiKey": "sk-123"}),
        );
        assert_eq!(event.payload["msg"], "hi");
        assert_eq!(event.payload["apiKey"], "[REDACTED]");
    }
}
