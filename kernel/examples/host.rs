//! Minimal hosting process: construct the kernel, wire a provider and an
//! agent, submit a task, and shut down gracefully.
//!
//! Run with real endpoints by exporting CONDUCTOR_OPENAI_API_KEY; without
//! a key the example still runs against the offline static provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_config::KernelConfig;
use conductor_contracts::{
    Agent, AgentInput, AgentOutput, AgentResult, CapabilityClass, ExecutionContext, TaskKind,
    TaskRequest, TaskType,
};
use conductor_kernel::ConductorKernel;
use conductor_model_router::{EndpointConfig, OpenAiChatClient, StaticProvider};
use serde_json::{json, Map, Value};

struct AnalysisAgent;

#[async_trait]
impl Agent for AnalysisAgent {
    fn name(&self) -> &str {
        "analysis-agent"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "summarizes whatever lands in its input bag"
    }

    fn supported_task_types(&self) -> Vec<TaskType> {
        vec![TaskType::CodeAnalysis, TaskType::Research]
    }

    async fn execute(&self, input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
        Ok(AgentOutput::new(json!({
            "summary": format!("analyzed {} input fields", input.payload.len()),
        })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let kernel = ConductorKernel::new(KernelConfig::default())?;

    // Providers: a real endpoint when a key is present, otherwise offline.
    if std::env::var("CONDUCTOR_OPENAI_API_KEY").is_ok() {
        let endpoint = EndpointConfig::new(
            "https://api.openai.com/v1/chat/completions",
            "",
            "gpt-4o-mini",
        )
        .with_key_from_env("CONDUCTOR_OPENAI_API_KEY");
        kernel.register_provider(Arc::new(OpenAiChatClient::new("openai-main", endpoint)?))?;
    } else {
        kernel.register_provider(Arc::new(StaticProvider::new(
            "offline",
            CapabilityClass::OpenaiClass,
            "offline provider reply",
        )))?;
    }

    kernel.register_agent(Arc::new(AnalysisAgent))?;
    kernel.start();
    kernel.start_health_monitor(Duration::from_secs(30));

    let mut events = kernel.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("[event] {} {}", event.kind.as_str(), event.subject);
        }
    });

    let mut input = Map::new();
    input.insert("target".into(), Value::from("src/lib.rs"));
    let task_id = kernel.submit(TaskRequest::new(TaskKind::Analysis, input))?;
    println!("submitted {task_id}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Some(record) = kernel.task_result(&task_id) {
        println!("task finished: {:?}", record.status);
    }
    println!("health: {:?}", kernel.health().status);

    kernel.shutdown().await;
    Ok(())
}
