//! Shared contracts for the conductor kernel.
//!
//! Everything that crosses a component boundary lives here: the agent
//! capability trait and its input/output envelope, the error taxonomy that
//! drives retry and circuit-breaker decisions, task and workflow data
//! types, the provider adapter contract, and the closed set of lifecycle
//! events.

pub mod agent;
pub mod error;
pub mod events;
pub mod health;
pub mod provider;
pub mod sanitize;
pub mod task;
pub mod workflow;

pub use agent::{
    mint_execution_id, Agent, AgentDescriptor, AgentInput, ExecutionContext, RetryOverride,
    RetryPolicy,
};
pub use error::{classify, AgentError, AgentOutput, AgentResult, ErrorCategory, ErrorKind};
pub use events::{EventKind, KernelEvent};
pub use health::HealthState;
pub use provider::{
    CapabilityClass, CompletionOptions, CompletionResponse, CompletionUsage, ModelProvider,
    ProviderError,
};
pub use sanitize::{is_sensitive_key, sanitize_map, sanitize_value};
pub use task::{
    mint_task_id, TaskKind, TaskPriority, TaskRecord, TaskRequest, TaskStatus, TaskType,
};
pub use workflow::{
    StepExecution, StepStatus, TriggerKind, WorkflowDefinition, WorkflowExecution, WorkflowStatus,
    WorkflowStep,
};
