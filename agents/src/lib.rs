//! Built-in model-backed agents.
//!
//! Each agent is a thin capability wrapper over the model router: it
//! reads the prompt from its input bag, forwards the call with its task
//! type and system prompt, and returns the provider's content with usage
//! provenance in the metadata. The four constructors match the
//! scheduler's default route table, so a kernel wired with them serves
//! code/research/documentation/analysis tasks out of the box.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_contracts::{
    Agent, AgentError, AgentInput, AgentOutput, AgentResult, CompletionOptions, ExecutionContext,
    TaskType,
};
use conductor_model_router::ModelRouter;
use serde_json::{json, Value};
use tracing::debug;

/// An agent that delegates its work to the model router.
pub struct ModelBackedAgent {
    name: String,
    description: String,
    task_type: TaskType,
    system_prompt: String,
    model_router: Arc<ModelRouter>,
}

impl ModelBackedAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
        system_prompt: impl Into<String>,
        model_router: Arc<ModelRouter>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            task_type,
            system_prompt: system_prompt.into(),
            model_router,
        }
    }

    /// The `code-agent` route target.
    pub fn code(model_router: Arc<ModelRouter>) -> Self {
        Self::new(
            "code-agent",
            "generates and edits code from a prompt",
            TaskType::CodeGeneration,
            "You are a senior engineer. Produce working, idiomatic code for the request.",
            model_router,
        )
    }

    /// The `research-agent` route target.
    pub fn research(model_router: Arc<ModelRouter>) -> Self {
        Self::new(
            "research-agent",
            "gathers and condenses information on a topic",
            TaskType::Research,
            "You are a research assistant. Answer with sourced, factual findings.",
            model_router,
        )
    }

    /// The `documentation-agent` route target.
    pub fn documentation(model_router: Arc<ModelRouter>) -> Self {
        Self::new(
            "documentation-agent",
            "writes documentation for code and systems",
            TaskType::Documentation,
            "You are a technical writer. Produce clear, accurate documentation.",
            model_router,
        )
    }

    /// The `analysis-agent` route target.
    pub fn analysis(model_router: Arc<ModelRouter>) -> Self {
        Self::new(
            "analysis-agent",
            "reviews code and reports findings",
            TaskType::CodeAnalysis,
            "You are a code reviewer. Report defects, risks, and improvements.",
            model_router,
        )
    }

    /// The effective task type: an explicit `taskType` input field (as
    /// injected by workflow steps) wins over the agent's own.
    fn effective_task_type(&self, input: &AgentInput) -> TaskType {
        input
            .field("taskType")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(self.task_type)
    }
}

#[async_trait]
impl Agent for ModelBackedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn supported_task_types(&self) -> Vec<TaskType> {
        vec![self.task_type]
    }

    async fn execute(&self, input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        let prompt = input
            .field("prompt")
            .or_else(|| input.field("request"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::validation(
                    "missing_prompt",
                    "a prompt or request field is required",
                )
            })?;

        let task_type = self.effective_task_type(&input);
        let options = CompletionOptions {
            system_prompt: Some(self.system_prompt.clone()),
            max_tokens: input
                .field("maxTokens")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            temperature: input
                .field("temperature")
                .and_then(Value::as_f64)
                .map(|v| v as f32),
        };

        debug!(agent = %self.name, task_type = task_type.as_str(), "dispatching model call");
        let response = self.model_router.execute(task_type, prompt, &options).await?;

        Ok(AgentOutput::new(json!({ "content": response.content }))
            .with_execution_time(response.execution_time_ms)
            .with_metadata("provider", Value::from(response.provider))
            .with_metadata("taskType", Value::from(task_type.as_str()))
            .with_metadata(
                "usage",
                json!({
                    "inputTokens": response.usage.input_tokens,
                    "outputTokens": response.usage.output_tokens,
                    "costUsd": response.usage.cost_usd,
                }),
            ))
    }
}
