//! Error taxonomy and tagged result type.
//!
//! Every operation inside the kernel that can fail returns `AgentResult`
//! rather than propagating exceptions. The classification of a failure
//! (kind and category) drives retry and circuit-breaker decisions in the
//! runtime envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broad failure category, the unit the envelope and breaker reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// The input itself is malformed; never retried, never counted.
    Validation,
    /// A deadline was reached inside the envelope or the model router.
    Timeout,
    /// Refused by an open breaker or exhausted half-open capacity.
    CircuitBreaker,
    /// Transport, network, rate-limit, or temporary upstream failure.
    System,
    /// The agent produced a definite, non-transient failure.
    Execution,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::CircuitBreaker => "circuit-breaker",
            ErrorCategory::System => "system",
            ErrorCategory::Execution => "execution",
        }
    }
}

/// Fine-grained failure kind. Retry policies name kinds, not categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Timeout,
    Network,
    RateLimit,
    Temporary,
    CircuitBreaker,
    Validation,
    Execution,
}

impl ErrorKind {
    /// The category a kind rolls up into.
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Timeout => ErrorCategory::Timeout,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Temporary => {
                ErrorCategory::System
            }
            ErrorKind::CircuitBreaker => ErrorCategory::CircuitBreaker,
            ErrorKind::Validation => ErrorCategory::Validation,
            ErrorKind::Execution => ErrorCategory::Execution,
        }
    }

    /// Whether failures of this kind are retried by default.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Temporary
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Temporary => "temporary",
            ErrorKind::CircuitBreaker => "circuit-breaker",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
        }
    }
}

/// Closed vocabulary for message-based classification. Order matters: the
/// first matching entry wins, so the more specific phrases come first.
const CLASSIFICATION_TABLE: &[(&str, ErrorKind)] = &[
    ("circuit breaker", ErrorKind::CircuitBreaker),
    ("rate limit", ErrorKind::RateLimit),
    ("quota", ErrorKind::RateLimit),
    ("timeout", ErrorKind::Timeout),
    ("timed out", ErrorKind::Timeout),
    ("network", ErrorKind::Network),
    ("connection", ErrorKind::Network),
    ("validation", ErrorKind::Validation),
    ("temporary", ErrorKind::Temporary),
    ("unavailable", ErrorKind::Temporary),
];

/// Classify a failure from its message, case-insensitively, over the
/// closed vocabulary. Unknown messages map to `Execution`.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    for (needle, kind) in CLASSIFICATION_TABLE {
        if lower.contains(needle) {
            return *kind;
        }
    }
    ErrorKind::Execution
}

/// A classified failure returned from the kernel.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AgentError {
    pub code: String,
    pub message: String,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentError {
    /// Build an error from an explicit kind; category and retryable flag
    /// derive from the kind.
    pub fn new(code: impl Into<String>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind,
            category: kind.category(),
            retryable: kind.default_retryable(),
            execution_time_ms: 0,
            metadata: Map::new(),
        }
    }

    /// Build an error whose kind is classified from the message.
    pub fn classified(code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(&message);
        Self::new(code, message, kind)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorKind::Validation)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("execution_timeout", message, ErrorKind::Timeout)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new("circuit_breaker_open", message, ErrorKind::CircuitBreaker)
    }

    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorKind::Temporary)
    }

    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, ErrorKind::Execution)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A successful agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    pub data: Value,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            execution_time_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The tagged union every agent invocation resolves to.
pub type AgentResult = Result<AgentOutput, AgentError>;
