//! Provider adapter contract for outbound LLM calls.
//!
//! Providers are opaque remote services; the kernel reaches them through
//! this one-method contract. Adapter failures carry a classification hint
//! from the same vocabulary the envelope uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{classify, ErrorKind};

/// Capability class a provider belongs to; the preference map routes task
/// types across classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityClass {
    OpenaiClass,
    AnthropicClass,
}

impl CapabilityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityClass::OpenaiClass => "openai-class",
            CapabilityClass::AnthropicClass => "anthropic-class",
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Token and cost accounting reported by the provider. Cost is a
/// pass-through; the kernel only accumulates it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

impl CompletionUsage {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// A successful provider completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: CompletionUsage,
}

/// A failed provider call, with a classification hint for the router.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub kind: ErrorKind,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Classify the kind from the message vocabulary.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(&message);
        Self { message, kind }
    }

    /// Whether the router may structurally retry this failure.
    pub fn is_transient(&self) -> bool {
        self.kind.default_retryable()
    }
}

/// The injected adapter every concrete provider satisfies.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider identifier for stats and provenance.
    fn id(&self) -> &str;

    /// The capability class this provider serves.
    fn capability_class(&self) -> CapabilityClass;

    /// Perform one completion call.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError>;
}
