//! Configuration surface for the conductor kernel.
//!
//! Every tunable is bundled into one [`KernelConfig`] value handed to the
//! kernel at construction. There is no module-level mutable state; a
//! subset of the fields (retry defaults, breaker thresholds, provider
//! preferences, queue bound) is hot-reloadable through the kernel, with
//! changes applying to future invocations only.

use std::collections::HashMap;

use conductor_contracts::{CapabilityClass, RetryPolicy, TaskKind, TaskType};
use conductor_resilience::BreakerConfig;
use serde::{Deserialize, Serialize};

pub mod loader;
mod validation;

pub use loader::{apply_env_overrides, load_from_env, load_from_file};
pub use validation::ConfigValidationError;

/// Runtime envelope tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Default per-invocation timeout when the input carries none (ms).
    pub default_timeout_ms: u64,
    /// Default retry policy, merged under per-invocation overrides.
    pub retry: RetryPolicy,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Metrics collector tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Samples kept in the per-agent duration ring.
    pub window_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { window_size: 100 }
    }
}

/// Model router tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Capability classes to try, in order, per task type.
    pub preferences: HashMap<TaskType, Vec<CapabilityClass>>,
    /// How long a failed availability probe keeps a provider skipped (ms).
    pub probe_interval_ms: u64,
    /// Outbound per-call timeout (ms).
    pub request_timeout_ms: u64,
}

impl RouterConfig {
    /// The default preference table.
    pub fn default_preferences() -> HashMap<TaskType, Vec<CapabilityClass>> {
        use CapabilityClass::{AnthropicClass, OpenaiClass};
        HashMap::from([
            (TaskType::Research, vec![AnthropicClass, OpenaiClass]),
            (TaskType::Planning, vec![OpenaiClass, AnthropicClass]),
            (TaskType::CodeAnalysis, vec![AnthropicClass, OpenaiClass]),
            (TaskType::CodeGeneration, vec![OpenaiClass, AnthropicClass]),
            (TaskType::Documentation, vec![AnthropicClass, OpenaiClass]),
            (TaskType::Optimization, vec![OpenaiClass, AnthropicClass]),
        ])
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            preferences: Self::default_preferences(),
            probe_interval_ms: 60_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Task scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum queued tasks before submissions are refused.
    pub queue_bound: usize,
    /// Terminal task records kept in memory.
    pub history_bound: usize,
    /// Which registered agent serves each non-workflow task kind.
    pub routes: HashMap<TaskKind, String>,
    /// How long shutdown waits for the active task (ms).
    pub drain_grace_ms: u64,
}

impl SchedulerConfig {
    pub fn default_routes() -> HashMap<TaskKind, String> {
        HashMap::from([
            (TaskKind::Code, "code-agent".to_string()),
            (TaskKind::Research, "research-agent".to_string()),
            (TaskKind::Documentation, "documentation-agent".to_string()),
            (TaskKind::Analysis, "analysis-agent".to_string()),
        ])
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_bound: 10_000,
            history_bound: 1_000,
            routes: Self::default_routes(),
            drain_grace_ms: 30_000,
        }
    }
}

/// Workflow engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Execution records kept in memory.
    pub history_bound: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            history_bound: 1_000,
        }
    }
}

/// Health aggregation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Task error rate above which the system is degraded.
    pub degraded_error_rate: f64,
    /// Task error rate above which the system is unhealthy.
    pub unhealthy_error_rate: f64,
    /// Queue depth as a fraction of the bound above which the system is
    /// unhealthy.
    pub queue_depth_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.1,
            unhealthy_error_rate: 0.5,
            queue_depth_ratio: 0.8,
        }
    }
}

/// The complete kernel configuration, passed at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub envelope: EnvelopeConfig,
    pub breaker: BreakerConfig,
    pub metrics: MetricsConfig,
    pub router: RouterConfig,
    pub scheduler: SchedulerConfig,
    pub workflows: WorkflowConfig,
    pub health: HealthConfig,
}

impl KernelConfig {
    /// Check every section, collecting all violations rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        validation::validate(self)
    }
}
