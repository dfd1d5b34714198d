//! Agent capability contract and invocation envelope types.
//!
//! An agent is a value implementing [`Agent`]: two read-only identity
//! fields and one async operation. The runtime envelope owns timeouts,
//! retries, and breaker gating; agents must propagate failures as
//! classified errors instead of catching them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentResult, ErrorKind};
use crate::task::TaskType;

/// Immutable registration record for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub supported_task_types: Vec<TaskType>,
}

/// Envelope retry policy. Retryable kinds are matched against the
/// classified kind of each failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub retryable_error_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            retryable_error_kinds: vec![
                ErrorKind::Timeout,
                ErrorKind::Network,
                ErrorKind::RateLimit,
                ErrorKind::Temporary,
            ],
        }
    }
}

impl RetryPolicy {
    /// Whether a failure of `kind` is in this policy's retryable set.
    pub fn retries_kind(&self, kind: ErrorKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    /// Merge a per-invocation override over this policy. Absent fields
    /// keep the base value.
    pub fn merged(&self, over: Option<&RetryOverride>) -> RetryPolicy {
        let Some(over) = over else {
            return self.clone();
        };
        RetryPolicy {
            max_retries: over.max_retries.unwrap_or(self.max_retries),
            initial_delay_ms: over.initial_delay_ms.unwrap_or(self.initial_delay_ms),
            backoff_multiplier: over.backoff_multiplier.unwrap_or(self.backoff_multiplier),
            max_delay_ms: over.max_delay_ms.unwrap_or(self.max_delay_ms),
            retryable_error_kinds: over
                .retryable_error_kinds
                .clone()
                .unwrap_or_else(|| self.retryable_error_kinds.clone()),
        }
    }
}

/// Per-invocation partial override of the retry policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_error_kinds: Option<Vec<ErrorKind>>,
}

/// Reserved metadata key carrying a distributed trace id.
pub const METADATA_TRACE_ID: &str = "traceId";
/// Reserved metadata key correlating related invocations.
pub const METADATA_CORRELATION_ID: &str = "correlationId";

/// Caller-supplied input: an open key/value bag plus a typed header for
/// the fields the envelope interprets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInput {
    /// Open payload forwarded to the agent untouched.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Per-invocation timeout in milliseconds. Zero or negative values
    /// are rejected at envelope entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    /// Per-invocation retry override merged over the envelope defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryOverride>,
    /// Arbitrary caller metadata. `traceId` and `correlationId` are
    /// reserved keys copied into the execution context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentInput {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    /// Convenience constructor for a single-field payload.
    pub fn with_field(key: impl Into<String>, value: Value) -> Self {
        let mut payload = Map::new();
        payload.insert(key.into(), value);
        Self::new(payload)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: Value) {
        self.payload.insert(key.into(), value);
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_TRACE_ID).and_then(Value::as_str)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_CORRELATION_ID)
            .and_then(Value::as_str)
    }
}

/// Mint a unique execution id of the form `<agent>-<epochMs>-<random>`.
pub fn mint_execution_id(agent_name: &str) -> String {
    const SUFFIX_LEN: usize = 9;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let n = rng.gen_range(0..36u32);
            char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("{}-{}-{}", agent_name, Utc::now().timestamp_millis(), suffix)
}

/// One invocation's identity and tracing snapshot. Created by the
/// envelope, destroyed when it returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(agent_name: &str, input: &AgentInput) -> Self {
        Self {
            execution_id: mint_execution_id(agent_name),
            started_at: Utc::now(),
            trace_id: input.trace_id().map(str::to_owned),
            correlation_id: input.correlation_id().map(str::to_owned),
            metadata: input.metadata.clone(),
        }
    }
}

/// The capability contract every registered agent satisfies.
///
/// Implementations must return `validation` errors for malformed inputs
/// rather than panicking, and must not swallow their own timeouts.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique registration name.
    fn name(&self) -> &str;

    /// Implementation version, informational.
    fn version(&self) -> &str;

    /// Human-readable description for the registration record.
    fn description(&self) -> &str {
        ""
    }

    /// Task types this agent may request from the model router.
    fn supported_task_types(&self) -> Vec<TaskType> {
        Vec::new()
    }

    /// Execute one invocation. Called only through the runtime envelope.
    async fn execute(&self, input: AgentInput, ctx: ExecutionContext) -> AgentResult;

    /// Registration record derived from the identity fields.
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.name().to_owned(),
            version: self.version().to_owned(),
            description: self.description().to_owned(),
            supported_task_types: self.supported_task_types(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_has_expected_shape() {
        let id = mint_execution_id("echo");
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "echo");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert!(!parts[2].is_empty());
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn execution_ids_are_unique() {
        let a = mint_execution_id("echo");
        let b = mint_execution_id("echo");
        assert_ne!(a, b);
    }

    #[test]
    fn retry_policy_merges_overrides_over_defaults() {
        let base = RetryPolicy::default();
        let over = RetryOverride {
            max_retries: Some(1),
            max_delay_ms: Some(5_000),
            ..Default::default()
        };
        let merged = base.merged(Some(&over));
        assert_eq!(merged.max_retries, 1);
        assert_eq!(merged.max_delay_ms, 5_000);
        assert_eq!(merged.initial_delay_ms, base.initial_delay_ms);
        assert_eq!(merged.backoff_multiplier, base.backoff_multiplier);
        assert_eq!(merged.retryable_error_kinds, base.retryable_error_kinds);
    }

    #[test]
    fn default_retryable_set_matches_transient_kinds() {
        let policy = RetryPolicy::default();
        assert!(policy.retries_kind(ErrorKind::Timeout));
        assert!(policy.retries_kind(ErrorKind::Network));
        assert!(policy.retries_kind(ErrorKind::RateLimit));
        assert!(policy.retries_kind(ErrorKind::Temporary));
        assert!(!policy.retries_kind(ErrorKind::Validation));
        assert!(!policy.retries_kind(ErrorKind::Execution));
    }

    #[test]
    fn context_copies_reserved_metadata_keys() {
        let mut input = AgentInput::with_field("msg", Value::from("hi"));
        input
            .metadata
            .insert(METADATA_TRACE_ID.into(), Value::from("trace-1"));
        input
            .metadata
            .insert(METADATA_CORRELATION_ID.into(), Value::from("corr-9"));
        let ctx = ExecutionContext::new("echo", &input);
        assert_eq!(ctx.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("corr-9"));
    }
}
