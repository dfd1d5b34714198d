//! Shared fixtures for the end-to-end kernel scenarios.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conductor_contracts::{
    Agent, AgentError, AgentInput, AgentOutput, AgentResult, CapabilityClass, CompletionOptions,
    CompletionResponse, CompletionUsage, ErrorKind, ExecutionContext, ModelProvider,
    ProviderError, TaskType,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Returns `{ "echo": input.msg }`.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "echoes the msg field back"
    }

    fn supported_task_types(&self) -> Vec<TaskType> {
        vec![TaskType::Planning]
    }

    async fn execute(&self, input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        let msg = input
            .field("msg")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::validation("missing_msg", "msg field is required"))?;
        Ok(AgentOutput::new(json!({ "echo": msg })))
    }
}

/// Fails a configurable number of invocations with a classified message,
/// then succeeds.
pub struct ScriptedAgent {
    name: String,
    failures: u32,
    failure_message: String,
    invocations: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(name: &str, failures: u32, failure_message: &str) -> Self {
        Self {
            name: name.to_string(),
            failures,
            failure_message: failure_message.to_string(),
            invocations: AtomicU32::new(0),
        }
    }

    pub fn always_failing(name: &str, failure_message: &str) -> Self {
        Self::new(name, u32::MAX, failure_message)
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn execute(&self, _input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        let seen = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if seen <= self.failures {
            Err(AgentError::classified(
                "scripted_failure",
                self.failure_message.clone(),
            ))
        } else {
            Ok(AgentOutput::new(json!({ "succeeded_on": seen })))
        }
    }
}

/// Always fails with a fixed code and message.
pub struct FailingAgent {
    name: String,
    code: String,
    message: String,
}

impl FailingAgent {
    pub fn new(name: &str, code: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn execute(&self, _input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        Err(AgentError::execution(
            self.code.clone(),
            self.message.clone(),
        ))
    }
}

/// Records the `marker` field of every invocation, in order.
pub struct RecordingAgent {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingAgent {
    pub fn new(name: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn execute(&self, input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        let marker = input
            .field("marker")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        self.log.lock().push(marker.clone());
        Ok(AgentOutput::new(json!({ "handled": marker })))
    }
}

/// Provider that replays a queue of scripted replies; once the script is
/// exhausted it keeps returning the last entry.
pub struct ScriptedProvider {
    id: String,
    class: CapabilityClass,
    replies: Mutex<VecDeque<Result<String, ErrorKind>>>,
    fallback: String,
}

impl ScriptedProvider {
    pub fn new(id: &str, class: CapabilityClass, replies: Vec<Result<String, ErrorKind>>) -> Self {
        Self {
            id: id.to_string(),
            class,
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: "scripted fallback reply".to_string(),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability_class(&self) -> CapabilityClass {
        self.class
    }

    async fn complete(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let next = self.replies.lock().pop_front();
        let content = match next {
            Some(Ok(content)) => content,
            Some(Err(kind)) => return Err(ProviderError::new(kind, "scripted provider failure")),
            None => self.fallback.clone(),
        };
        Ok(CompletionResponse {
            content,
            usage: CompletionUsage {
                input_tokens: 4,
                output_tokens: 4,
                cost_usd: 0.001,
            },
        })
    }
}

/// Convenience: an `Arc<dyn Agent>` from any concrete agent.
pub fn agent(value: impl Agent + 'static) -> Arc<dyn Agent> {
    Arc::new(value)
}
