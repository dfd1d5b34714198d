//! The capability-aware dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_config::RouterConfig;
use conductor_contracts::{
    AgentError, CapabilityClass, CompletionOptions, CompletionUsage, ErrorKind, ModelProvider,
    ProviderError, TaskType,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

struct ProviderState {
    available: bool,
    last_probe: Option<Instant>,
    last_probe_wall: Option<DateTime<Utc>>,
    rolling_cost_usd: f64,
    rolling_tokens: u64,
}

struct ProviderEntry {
    adapter: Arc<dyn ModelProvider>,
    state: Mutex<ProviderState>,
}

impl ProviderEntry {
    fn new(adapter: Arc<dyn ModelProvider>) -> Self {
        Self {
            adapter,
            state: Mutex::new(ProviderState {
                available: true,
                last_probe: None,
                last_probe_wall: None,
                rolling_cost_usd: 0.0,
                rolling_tokens: 0,
            }),
        }
    }

    fn mark_failed(&self) {
        let mut state = self.state.lock();
        state.available = false;
        state.last_probe = Some(Instant::now());
        state.last_probe_wall = Some(Utc::now());
    }

    fn mark_succeeded(&self, usage: &CompletionUsage) {
        let mut state = self.state.lock();
        state.available = true;
        state.last_probe = Some(Instant::now());
        state.last_probe_wall = Some(Utc::now());
        state.rolling_cost_usd += usage.cost_usd;
        state.rolling_tokens += usage.total_tokens();
    }

    /// Whether the probe cache still vetoes this provider.
    fn skip_for_now(&self, probe_interval: Duration) -> bool {
        let state = self.state.lock();
        if state.available {
            return false;
        }
        match state.last_probe {
            Some(at) => at.elapsed() < probe_interval,
            None => false,
        }
    }
}

/// Outcome of a routed completion call.
#[derive(Debug, Clone, Serialize)]
pub struct RouterResponse {
    pub content: String,
    pub provider: String,
    pub usage: CompletionUsage,
    pub execution_time_ms: u64,
}

/// Per-provider stats for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub provider: String,
    pub capability_class: CapabilityClass,
    pub available: bool,
    pub last_probe: Option<DateTime<Utc>>,
    pub rolling_cost_usd: f64,
    pub rolling_tokens: u64,
}

/// Registry of provider adapters plus the task-type preference map.
pub struct ModelRouter {
    providers: RwLock<Vec<Arc<ProviderEntry>>>,
    preferences: RwLock<HashMap<TaskType, Vec<CapabilityClass>>>,
    probe_interval: Duration,
    request_timeout: Duration,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            preferences: RwLock::new(config.preferences),
            probe_interval: Duration::from_millis(config.probe_interval_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Register a provider adapter. Ids must be unique.
    pub fn register_provider(&self, adapter: Arc<dyn ModelProvider>) -> Result<(), AgentError> {
        let mut providers = self.providers.write();
        if providers.iter().any(|p| p.adapter.id() == adapter.id()) {
            return Err(AgentError::validation(
                "provider_already_registered",
                format!("provider '{}' is already registered", adapter.id()),
            ));
        }
        providers.push(Arc::new(ProviderEntry::new(adapter)));
        Ok(())
    }

    /// Replace the preference map. Applies to future calls only.
    pub fn set_preferences(&self, preferences: HashMap<TaskType, Vec<CapabilityClass>>) {
        *self.preferences.write() = preferences;
    }

    /// Candidate providers for a task type, in preference order.
    fn candidates(&self, task_type: TaskType) -> Vec<Arc<ProviderEntry>> {
        let providers = self.providers.read();
        let preferences = self.preferences.read();
        let classes: Vec<CapabilityClass> = preferences
            .get(&task_type)
            .cloned()
            .unwrap_or_else(|| {
                vec![CapabilityClass::OpenaiClass, CapabilityClass::AnthropicClass]
            });
        let mut ordered = Vec::new();
        for class in classes {
            for entry in providers.iter() {
                if entry.adapter.capability_class() == class {
                    ordered.push(Arc::clone(entry));
                }
            }
        }
        ordered
    }

    /// Route one completion call. Walks the candidate list, skipping
    /// providers inside their failed-probe window, retrying transient
    /// failures once per candidate, and failing over on anything else
    /// except provider-side validation.
    pub async fn execute(
        &self,
        task_type: TaskType,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RouterResponse, AgentError> {
        let started = Instant::now();
        let candidates = self.candidates(task_type);
        if candidates.is_empty() {
            return Err(AgentError::new(
                "no_providers",
                format!("no provider registered for {}", task_type.as_str()),
                ErrorKind::Temporary,
            ));
        }

        let mut last_failure: Option<ProviderError> = None;
        for entry in &candidates {
            if entry.skip_for_now(self.probe_interval) {
                debug!(provider = entry.adapter.id(), "skipping provider inside probe window");
                continue;
            }
            match self.call_candidate(entry, prompt, options).await {
                Ok(response) => {
                    entry.mark_succeeded(&response.usage);
                    return Ok(RouterResponse {
                        content: response.content,
                        provider: entry.adapter.id().to_string(),
                        usage: response.usage,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(err) if err.kind == ErrorKind::Validation => {
                    // The request itself is bad; another provider would
                    // refuse it the same way.
                    return Err(AgentError::new(
                        "provider_rejected_request",
                        err.message,
                        ErrorKind::Validation,
                    )
                    .with_execution_time(started.elapsed().as_millis() as u64));
                }
                Err(err) => {
                    warn!(
                        provider = entry.adapter.id(),
                        error = %err,
                        "provider call failed, failing over"
                    );
                    entry.mark_failed();
                    last_failure = Some(err);
                }
            }
        }

        let detail = last_failure
            .map(|e| e.message)
            .unwrap_or_else(|| "every candidate is inside its failed-probe window".to_string());
        Err(AgentError::new(
            "all_providers_unavailable",
            format!(
                "no provider available for {}: {detail}",
                task_type.as_str()
            ),
            ErrorKind::Temporary,
        )
        .with_execution_time(started.elapsed().as_millis() as u64))
    }

    /// One candidate attempt: outbound timeout plus a single structural
    /// retry for system-class failures.
    async fn call_candidate(
        &self,
        entry: &ProviderEntry,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<conductor_contracts::CompletionResponse, ProviderError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome =
                tokio::time::timeout(self.request_timeout, entry.adapter.complete(prompt, options))
                    .await;
            let err = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => err,
                Err(_) => ProviderError::new(
                    ErrorKind::Timeout,
                    format!(
                        "provider '{}' timed out after {}ms",
                        entry.adapter.id(),
                        self.request_timeout.as_millis()
                    ),
                ),
            };
            let structural = matches!(
                err.kind,
                ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Temporary
            );
            if structural && attempts == 1 {
                debug!(provider = entry.adapter.id(), error = %err, "structural retry");
                continue;
            }
            return Err(err);
        }
    }

    /// Informational: the first admissible candidate for a task type.
    pub fn select_optimal_model(&self, task_type: TaskType) -> Option<String> {
        self.candidates(task_type)
            .into_iter()
            .find(|entry| !entry.skip_for_now(self.probe_interval))
            .map(|entry| entry.adapter.id().to_string())
    }

    /// Per-provider availability, probe timestamps, and rolling tallies.
    pub fn model_stats(&self) -> Vec<ModelStats> {
        self.providers
            .read()
            .iter()
            .map(|entry| {
                let state = entry.state.lock();
                ModelStats {
                    provider: entry.adapter.id().to_string(),
                    capability_class: entry.adapter.capability_class(),
                    available: state.available,
                    last_probe: state.last_probe_wall,
                    rolling_cost_usd: state.rolling_cost_usd,
                    rolling_tokens: state.rolling_tokens,
                }
            })
            .collect()
    }

    /// Availability per capability class: `(available, total)`.
    pub fn class_availability(&self) -> HashMap<CapabilityClass, (usize, usize)> {
        let mut summary: HashMap<CapabilityClass, (usize, usize)> = HashMap::new();
        for entry in self.providers.read().iter() {
            let class = entry.adapter.capability_class();
            let available = entry.state.lock().available;
            let slot = summary.entry(class).or_insert((0, 0));
            slot.1 += 1;
            if available {
                slot.0 += 1;
            }
        }
        summary
    }
}
