//! The workflow engine.
//!
//! A workflow is a named, ordered list of steps executed sequentially.
//! Each step dispatches one agent through the registry with the
//! cumulative context plus the step's prompt and task type; its output is
//! merged back under the step id. The first failing step aborts the
//! whole run.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use conductor_config::WorkflowConfig;
use conductor_contracts::{
    AgentError, AgentInput, AgentOutput, AgentResult, EventKind, StepExecution, StepStatus,
    TriggerKind, WorkflowDefinition, WorkflowExecution, WorkflowStatus,
};
use conductor_events::EventBus;
use conductor_runtime::AgentRegistry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct WorkflowEngine {
    registry: Arc<AgentRegistry>,
    bus: EventBus,
    workflows: DashMap<String, WorkflowDefinition>,
    history: Mutex<VecDeque<WorkflowExecution>>,
    history_bound: usize,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRegistry>, bus: EventBus, config: WorkflowConfig) -> Self {
        Self {
            registry,
            bus,
            workflows: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            history_bound: config.history_bound.max(1),
        }
    }

    /// Register a workflow definition. Duplicate ids are rejected and the
    /// existing definition is left untouched. Agent names are not checked
    /// here; they bind at step-dispatch time.
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), AgentError> {
        if definition.steps.is_empty() {
            return Err(AgentError::validation(
                "workflow_without_steps",
                format!("workflow '{}' has no steps", definition.id),
            ));
        }
        match self.workflows.entry(definition.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AgentError::validation(
                "workflow_already_registered",
                format!("workflow '{}' is already registered", definition.id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(workflow = %definition.id, steps = definition.steps.len(), "workflow registered");
                slot.insert(definition);
                Ok(())
            }
        }
    }

    pub fn deregister_workflow(&self, id: &str) -> bool {
        self.workflows.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    pub fn definitions(&self) -> Vec<WorkflowDefinition> {
        self.workflows.iter().map(|e| e.value().clone()).collect()
    }

    /// Recent executions, oldest first.
    pub fn executions(&self) -> Vec<WorkflowExecution> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.history
            .lock()
            .iter()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    /// Run one workflow to completion or first failure.
    pub async fn execute(
        &self,
        workflow_id: &str,
        input: Map<String, Value>,
        trigger: TriggerKind,
    ) -> AgentResult {
        let definition = match self.workflows.get(workflow_id) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(AgentError::validation(
                    "workflow_not_found",
                    format!("no workflow registered under '{workflow_id}'"),
                ))
            }
        };

        let execution_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        let total_steps = definition.steps.len();

        self.bus.emit(
            EventKind::WorkflowStarted,
            workflow_id,
            json!({
                "workflowId": workflow_id,
                "executionId": execution_id,
                "totalSteps": total_steps,
                "trigger": trigger,
            }),
        );

        let mut cumulative = input.clone();
        let mut step_records: Vec<StepExecution> = Vec::with_capacity(total_steps);

        for step in &definition.steps {
            let step_started_at = Utc::now();
            let step_started = Instant::now();

            let mut payload = cumulative.clone();
            payload.insert("prompt".into(), Value::from(step.prompt.clone()));
            payload.insert(
                "taskType".into(),
                serde_json::to_value(step.task_type).unwrap_or(Value::Null),
            );
            let step_input = AgentInput::new(payload);

            match self.registry.delegate(&step.agent_name, step_input).await {
                Ok(output) => {
                    cumulative.insert(step.id.clone(), output.data);
                    step_records.push(StepExecution {
                        step_id: step.id.clone(),
                        agent_name: step.agent_name.clone(),
                        status: StepStatus::Completed,
                        started_at: step_started_at,
                        duration_ms: step_started.elapsed().as_millis() as u64,
                        error: None,
                    });
                }
                Err(step_err) => {
                    warn!(
                        workflow = %workflow_id,
                        step = %step.id,
                        error = %step_err,
                        "workflow step failed, aborting"
                    );
                    step_records.push(StepExecution {
                        step_id: step.id.clone(),
                        agent_name: step.agent_name.clone(),
                        status: StepStatus::Failed,
                        started_at: step_started_at,
                        duration_ms: step_started.elapsed().as_millis() as u64,
                        error: Some(step_err.clone()),
                    });
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.record_execution(WorkflowExecution {
                        id: execution_id.clone(),
                        workflow_id: workflow_id.to_string(),
                        trigger,
                        status: WorkflowStatus::Failed,
                        started_at,
                        completed_at: Some(Utc::now()),
                        duration_ms: Some(duration_ms),
                        input,
                        output: None,
                        error: Some(step_err.message.clone()),
                        steps: step_records,
                    });
                    self.bus.emit(
                        EventKind::WorkflowFailed,
                        workflow_id,
                        json!({
                            "workflowId": workflow_id,
                            "executionId": execution_id,
                            "stepId": step.id,
                            "error": step_err.message,
                        }),
                    );

                    // The step error is returned as-is, wrapped with the
                    // workflow-level code and the failing step id.
                    let mut wrapped = AgentError {
                        code: "step_execution_failed".into(),
                        message: format!("step '{}' failed: {}", step.id, step_err.message),
                        kind: step_err.kind,
                        category: step_err.category,
                        retryable: step_err.retryable,
                        execution_time_ms: duration_ms,
                        metadata: Map::new(),
                    };
                    wrapped.metadata.insert("workflowId".into(), Value::from(workflow_id));
                    wrapped
                        .metadata
                        .insert("executionId".into(), Value::from(execution_id));
                    wrapped
                        .metadata
                        .insert("stepId".into(), Value::from(step.id.clone()));
                    wrapped
                        .metadata
                        .insert("stepErrorCode".into(), Value::from(step_err.code));
                    wrapped.metadata.insert(
                        "partialResults".into(),
                        Value::Object(cumulative),
                    );
                    return Err(wrapped);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.record_execution(WorkflowExecution {
            id: execution_id.clone(),
            workflow_id: workflow_id.to_string(),
            trigger,
            status: WorkflowStatus::Completed,
            started_at,
            completed_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            input,
            output: Some(cumulative.clone()),
            error: None,
            steps: step_records,
        });
        self.bus.emit(
            EventKind::WorkflowCompleted,
            workflow_id,
            json!({
                "workflowId": workflow_id,
                "executionId": execution_id,
                "totalSteps": total_steps,
                "durationMs": duration_ms,
            }),
        );

        Ok(AgentOutput::new(Value::Object(cumulative))
            .with_execution_time(duration_ms)
            .with_metadata("workflowId", Value::from(workflow_id))
            .with_metadata("executionId", Value::from(execution_id))
            .with_metadata("totalSteps", Value::from(total_steps)))
    }

    fn record_execution(&self, execution: WorkflowExecution) {
        let mut history = self.history.lock();
        if history.len() == self.history_bound {
            history.pop_front();
        }
        history.push_back(execution);
    }
}
