//! Smart routing of free-form requests.
//!
//! The router asks the model router (planning task type, low temperature,
//! small token budget) to classify a request against the closed
//! vocabulary of registered agent names plus `none`. A recognized name is
//! dispatched through the registry; anything else falls back to a direct
//! model call wrapped as an ok result.

use std::sync::Arc;

use conductor_contracts::{AgentInput, AgentOutput, AgentResult, CompletionOptions, TaskType};
use conductor_model_router::ModelRouter;
use conductor_runtime::AgentRegistry;
use serde_json::{json, Value};
use tracing::debug;

pub struct SmartRouter {
    registry: Arc<AgentRegistry>,
    model_router: Arc<ModelRouter>,
}

impl SmartRouter {
    pub fn new(registry: Arc<AgentRegistry>, model_router: Arc<ModelRouter>) -> Self {
        Self {
            registry,
            model_router,
        }
    }

    /// Pick the best-matching registered agent for a free-form request,
    /// or answer directly through the model router.
    pub async fn smart_execute(&self, request: &str) -> AgentResult {
        let names = self.registry.agent_names();
        if !names.is_empty() {
            match self.classify(request, &names).await {
                Some(agent_name) => {
                    debug!(agent = %agent_name, "smart router matched a registered agent");
                    let input = AgentInput::with_field("request", Value::from(request));
                    return self
                        .registry
                        .delegate(&agent_name, input)
                        .await
                        .map(|output| {
                            output
                                .with_metadata("routedAgent", Value::from(agent_name.clone()))
                                .with_metadata("fallback", Value::from(false))
                        });
                }
                None => {
                    debug!("no confident agent match, falling back to the model router");
                }
            }
        }

        let response = self
            .model_router
            .execute(TaskType::Planning, request, &CompletionOptions::default())
            .await?;
        Ok(AgentOutput::new(json!({
            "content": response.content,
            "provider": response.provider,
            "usage": response.usage,
        }))
        .with_execution_time(response.execution_time_ms)
        .with_metadata("fallback", Value::from(true)))
    }

    /// Ask the model router for a classification token. `None` means no
    /// confident match (including classification failures).
    async fn classify(&self, request: &str, names: &[String]) -> Option<String> {
        let mut vocabulary = names.to_vec();
        vocabulary.push("none".to_string());
        let prompt = format!(
            "Select the agent best suited to handle the request below.\n\
             Respond with exactly one token from: {}.\n\nRequest: {}",
            vocabulary.join(", "),
            request
        );
        let options = CompletionOptions {
            system_prompt: Some(
                "You route requests to specialized agents. Answer with one token only."
                    .to_string(),
            ),
            max_tokens: Some(16),
            temperature: Some(0.1),
        };

        match self
            .model_router
            .execute(TaskType::Planning, &prompt, &options)
            .await
        {
            Ok(response) => match_token(&response.content, names),
            Err(err) => {
                debug!(error = %err, "classification call failed");
                None
            }
        }
    }
}

/// Match a classification reply against the registered names. An exact
/// token wins; otherwise the reply must contain exactly one name.
fn match_token(reply: &str, names: &[String]) -> Option<String> {
    let token = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .to_ascii_lowercase();
    if token == "none" {
        return None;
    }
    if let Some(exact) = names.iter().find(|n| n.to_ascii_lowercase() == token) {
        return Some(exact.clone());
    }
    let contained: Vec<&String> = names
        .iter()
        .filter(|n| token.contains(&n.to_ascii_lowercase()))
        .collect();
    match contained.as_slice() {
        [single] => Some((*single).clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_config::{EnvelopeConfig, RouterConfig};
    use conductor_contracts::{
        Agent, AgentError, AgentOutput, CapabilityClass, CompletionResponse, CompletionUsage,
        ErrorKind, ExecutionContext, ModelProvider, ProviderError,
    };
    use conductor_resilience::BreakerConfig;
    use conductor_runtime::ExecutionEnvelope;
    use parking_lot::{Mutex, RwLock};
    use serde_json::json;
    use std::collections::VecDeque;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct ReplayProvider {
        replies: Mutex<VecDeque<Result<String, ErrorKind>>>,
    }

    impl ReplayProvider {
        fn new(replies: Vec<Result<String, ErrorKind>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ReplayProvider {
        fn id(&self) -> &str {
            "replay"
        }

        fn capability_class(&self) -> CapabilityClass {
            CapabilityClass::OpenaiClass
        }

        async fn complete(
            &self,
            _prompt: &str,
            _options: &conductor_contracts::CompletionOptions,
        ) -> Result<CompletionResponse, ProviderError> {
            match self.replies.lock().pop_front() {
                Some(Ok(content)) => Ok(CompletionResponse {
                    content,
                    usage: CompletionUsage::default(),
                }),
                Some(Err(kind)) => Err(ProviderError::new(kind, "replayed failure")),
                None => Ok(CompletionResponse {
                    content: "exhausted".into(),
                    usage: CompletionUsage::default(),
                }),
            }
        }
    }

    struct GreeterAgent;

    #[async_trait]
    impl Agent for GreeterAgent {
        fn name(&self) -> &str {
            "greeter"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        async fn execute(
            &self,
            input: AgentInput,
            _ctx: ExecutionContext,
        ) -> conductor_contracts::AgentResult {
            let request = input
                .field("request")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::validation("missing_request", "request required"))?;
            Ok(AgentOutput::new(json!({ "greeting": format!("hello, {request}") })))
        }
    }

    fn fixture(replies: Vec<Result<String, ErrorKind>>) -> (SmartRouter, Arc<AgentRegistry>) {
        let bus = conductor_events::EventBus::new();
        let envelope = ExecutionEnvelope::new(
            bus.clone(),
            Arc::new(RwLock::new(EnvelopeConfig::default())),
        );
        let registry = Arc::new(AgentRegistry::new(
            bus,
            envelope,
            Arc::new(RwLock::new(BreakerConfig::default())),
            100,
        ));
        let model_router = Arc::new(ModelRouter::new(RouterConfig::default()));
        model_router
            .register_provider(Arc::new(ReplayProvider::new(replies)))
            .unwrap();
        (
            SmartRouter::new(Arc::clone(&registry), model_router),
            registry,
        )
    }

    #[tokio::test]
    async fn classified_token_dispatches_the_agent() {
        let (router, registry) = fixture(vec![Ok("greeter".to_string())]);
        registry.register_agent(Arc::new(GreeterAgent)).unwrap();

        let output = router.smart_execute("world").await.unwrap();
        assert_eq!(output.data["greeting"], "hello, world");
        assert_eq!(output.metadata["routedAgent"], "greeter");
        assert_eq!(output.metadata["fallback"], false);
    }

    #[tokio::test]
    async fn classification_failure_falls_back_to_a_direct_call() {
        // classification errors, then the direct call answers
        let (router, registry) = fixture(vec![
            Err(ErrorKind::Validation),
            Ok("direct reply".to_string()),
        ]);
        registry.register_agent(Arc::new(GreeterAgent)).unwrap();

        let output = router.smart_execute("whatever").await.unwrap();
        assert_eq!(output.data["content"], "direct reply");
        assert_eq!(output.metadata["fallback"], true);
    }

    #[tokio::test]
    async fn with_no_agents_the_classification_call_is_skipped() {
        // a single scripted reply; it must be consumed by the direct call,
        // not by a classification round-trip
        let (router, _registry) = fixture(vec![Ok("only reply".to_string())]);
        let output = router.smart_execute("anything").await.unwrap();
        assert_eq!(output.data["content"], "only reply");
        assert_eq!(output.metadata["fallback"], true);
    }

    #[test]
    fn exact_token_matches() {
        let registered = names(&["research-agent", "code-agent"]);
        assert_eq!(
            match_token("research-agent", &registered),
            Some("research-agent".to_string())
        );
        assert_eq!(
            match_token("  \"Code-Agent\".  ", &registered),
            Some("code-agent".to_string())
        );
    }

    #[test]
    fn none_and_unknown_tokens_do_not_match() {
        let registered = names(&["research-agent"]);
        assert_eq!(match_token("none", &registered), None);
        assert_eq!(match_token("poetry-agent", &registered), None);
    }

    #[test]
    fn ambiguous_containment_does_not_match() {
        let registered = names(&["code-agent", "research-agent"]);
        assert_eq!(
            match_token("either code-agent or research-agent", &registered),
            None
        );
        assert_eq!(
            match_token("use the code-agent here", &registered),
            Some("code-agent".to_string())
        );
    }
}
