//! Concrete provider adapters.
//!
//! Two HTTP clients cover the supported capability classes: an
//! OpenAI-compatible chat-completions client and an Anthropic-compatible
//! messages client. Both translate transport and status failures into
//! classified [`ProviderError`]s so the router can decide failover and
//! retry. A [`StaticProvider`] serves tests and offline wiring.

use async_trait::async_trait;
use conductor_contracts::{
    CapabilityClass, CompletionOptions, CompletionResponse, CompletionUsage, ErrorKind,
    ModelProvider, ProviderError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Connection settings for one remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Default generation budget when the caller supplies none.
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
    /// Price per 1k input tokens, used for the cost pass-through.
    pub input_cost_per_1k: f64,
    /// Price per 1k output tokens.
    pub output_cost_per_1k: f64,
}

impl EndpointConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1_024,
            temperature: 0.7,
            timeout_ms: 30_000,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }

    /// Replace the key with the value of `var` when set, so secrets stay
    /// out of checked-in configuration.
    pub fn with_key_from_env(mut self, var: &str) -> Self {
        if let Ok(key) = std::env::var(var) {
            self.api_key = key;
        }
        self
    }

    fn cost_for(&self, usage_in: u32, usage_out: u32) -> f64 {
        f64::from(usage_in) / 1_000.0 * self.input_cost_per_1k
            + f64::from(usage_out) / 1_000.0 * self.output_cost_per_1k
    }
}

fn build_http_client(timeout_ms: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| ProviderError::new(ErrorKind::Execution, format!("http client: {e}")))
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::new(ErrorKind::Timeout, format!("provider timeout: {err}"))
    } else if err.is_connect() {
        ProviderError::new(ErrorKind::Network, format!("connection failed: {err}"))
    } else {
        ProviderError::new(ErrorKind::Network, format!("network error: {err}"))
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let kind = match status.as_u16() {
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Temporary,
        _ => ErrorKind::Validation,
    };
    ProviderError::new(kind, format!("provider returned {status}: {body}"))
}

/// OpenAI-compatible chat-completions client (`openai-class`).
pub struct OpenAiChatClient {
    id: String,
    config: EndpointConfig,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(id: impl Into<String>, config: EndpointConfig) -> Result<Self, ProviderError> {
        let client = build_http_client(config.timeout_ms)?;
        Ok(Self {
            id: id.into(),
            config,
            client,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiChatClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability_class(&self) -> CapabilityClass {
        CapabilityClass::OpenaiClass
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &options.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let payload = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": options.temperature.unwrap_or(self.config.temperature),
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Execution, format!("invalid response: {e}")))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::new(ErrorKind::Execution, "response missing message content")
            })?
            .to_string();

        let input_tokens = data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(CompletionResponse {
            content,
            usage: CompletionUsage {
                input_tokens,
                output_tokens,
                cost_usd: self.config.cost_for(input_tokens, output_tokens),
            },
        })
    }
}

/// Anthropic-compatible messages client (`anthropic-class`).
pub struct AnthropicMessagesClient {
    id: String,
    config: EndpointConfig,
    client: reqwest::Client,
}

impl AnthropicMessagesClient {
    pub fn new(id: impl Into<String>, config: EndpointConfig) -> Result<Self, ProviderError> {
        let client = build_http_client(config.timeout_ms)?;
        Ok(Self {
            id: id.into(),
            config,
            client,
        })
    }
}

#[async_trait]
impl ModelProvider for AnthropicMessagesClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability_class(&self) -> CapabilityClass {
        CapabilityClass::AnthropicClass
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": options.temperature.unwrap_or(self.config.temperature),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = &options.system_prompt {
            payload["system"] = json!(system);
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Execution, format!("invalid response: {e}")))?;

        let content = data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::new(ErrorKind::Execution, "response missing content text"))?
            .to_string();

        let input_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(CompletionResponse {
            content,
            usage: CompletionUsage {
                input_tokens,
                output_tokens,
                cost_usd: self.config.cost_for(input_tokens, output_tokens),
            },
        })
    }
}

/// In-process provider returning a fixed response. Useful for tests and
/// for wiring a kernel without network access.
pub struct StaticProvider {
    id: String,
    class: CapabilityClass,
    content: String,
}

impl StaticProvider {
    pub fn new(
        id: impl Into<String>,
        class: CapabilityClass,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            class,
            content: content.into(),
        }
    }
}

#[async_trait]
impl ModelProvider for StaticProvider {
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
        Ok(CompletionResponse {
            content: self.content.clone(),
            usage: CompletionUsage {
                input_tokens: 1,
                output_tokens: 1,
                cost_usd: 0.0,
            },
        })
    }
}
