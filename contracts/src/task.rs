//! Task-level types for the external-facing scheduler.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, AgentOutput};

/// The model-facing task type an agent or workflow step requests from the
/// model router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Research,
    Planning,
    CodeGeneration,
    Documentation,
    CodeAnalysis,
    Optimization,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Research,
        TaskType::Planning,
        TaskType::CodeGeneration,
        TaskType::Documentation,
        TaskType::CodeAnalysis,
        TaskType::Optimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Research => "research",
            TaskType::Planning => "planning",
            TaskType::CodeGeneration => "code-generation",
            TaskType::Documentation => "documentation",
            TaskType::CodeAnalysis => "code-analysis",
            TaskType::Optimization => "optimization",
        }
    }
}

/// Kind of a client-submitted task, governing how the scheduler routes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Code,
    Research,
    Documentation,
    Analysis,
    Workflow,
}

/// Dispatch priority. Ordering is by urgency: `Critical > High > Medium >
/// Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// Lifecycle state of a submitted task. `NotFound` is the answer for an
/// id the scheduler has never seen or has already evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
    NotFound,
}

/// A client submission handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, input: Map<String, Value>) -> Self {
        Self {
            kind,
            input,
            priority: None,
            deadline: None,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Terminal record of one task, kept in the bounded scheduler history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Mint a task id of the form `task_<epochMs>_<random>`.
pub fn mint_task_id() -> String {
    const SUFFIX_LEN: usize = 9;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let n = rng.gen_range(0..36u32);
            char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("task_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_by_urgency() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn task_id_shape() {
        let id = mint_task_id();
        assert!(id.starts_with("task_"));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn task_type_serializes_kebab_case() {
        let json = serde_json::to_string(&TaskType::CodeGeneration).unwrap();
        assert_eq!(json, "\"code-generation\"");
        let back: TaskType = serde_json::from_str("\"code-analysis\"").unwrap();
        assert_eq!(back, TaskType::CodeAnalysis);
    }
}
