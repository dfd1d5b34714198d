//! Agent registry and delegator.
//!
//! One entry per registered agent owns the agent, its circuit breaker,
//! and its metrics together, so unregistering removes all three
//! atomically. Delegation is the only path into agent execution and
//! always routes through the envelope.

use std::sync::Arc;

use conductor_contracts::{
    AgentDescriptor, AgentError, AgentInput, AgentResult, EventKind, HealthState,
};
use conductor_events::EventBus;
use conductor_resilience::{BreakerConfig, BreakerState, CircuitBreaker};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::envelope::ExecutionEnvelope;
use crate::metrics::{AgentMetrics, MetricsSnapshot};

/// Everything the runtime keeps for one registered agent.
pub struct AgentEntry {
    pub agent: Arc<dyn conductor_contracts::Agent>,
    pub descriptor: AgentDescriptor,
    pub breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<AgentMetrics>,
    /// Couples breaker and metrics updates for one event so observers
    /// read a consistent (state, counters) pair.
    pub(crate) record_lock: Mutex<()>,
}

/// Status report for one agent name.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<AgentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthState>,
}

/// Shared breaker settings applied to agents registered after a reload.
pub type SharedBreakerConfig = Arc<RwLock<BreakerConfig>>;

pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentEntry>>,
    envelope: ExecutionEnvelope,
    bus: EventBus,
    breaker_config: SharedBreakerConfig,
    metrics_window: usize,
}

impl AgentRegistry {
    pub fn new(
        bus: EventBus,
        envelope: ExecutionEnvelope,
        breaker_config: SharedBreakerConfig,
        metrics_window: usize,
    ) -> Self {
        Self {
            agents: DashMap::new(),
            envelope,
            bus,
            breaker_config,
            metrics_window,
        }
    }

    /// Register an agent under its name. Duplicate names are rejected and
    /// leave the registry unchanged.
    pub fn register_agent(
        &self,
        agent: Arc<dyn conductor_contracts::Agent>,
    ) -> Result<(), AgentError> {
        let descriptor = agent.descriptor();
        let name = descriptor.name.clone();
        match self.agents.entry(name.clone()) {
            Entry::Occupied(_) => Err(AgentError::validation(
                "agent_already_registered",
                format!("agent '{name}' is already registered"),
            )),
            Entry::Vacant(slot) => {
                let breaker = Arc::new(CircuitBreaker::new(
                    name.clone(),
                    self.breaker_config.read().clone(),
                ));
                let bus = self.bus.clone();
                let subject = name.clone();
                breaker.set_transition_hook(Arc::new(move |state| {
                    let kind = match state {
                        BreakerState::Open => EventKind::BreakerOpened,
                        BreakerState::HalfOpen => EventKind::BreakerHalfOpen,
                        BreakerState::Closed => EventKind::BreakerClosed,
                    };
                    bus.emit(kind, &subject, json!({ "state": state.as_str() }));
                }));

                slot.insert(Arc::new(AgentEntry {
                    agent,
                    descriptor,
                    breaker,
                    metrics: Arc::new(AgentMetrics::new(self.metrics_window)),
                    record_lock: Mutex::new(()),
                }));
                info!(agent = %name, "agent registered");
                Ok(())
            }
        }
    }

    /// Remove an agent together with its breaker and metrics.
    pub fn unregister_agent(&self, name: &str) -> bool {
        let removed = self.agents.remove(name).is_some();
        if removed {
            info!(agent = %name, "agent unregistered");
        }
        removed
    }

    /// Route one invocation to a registered agent through the envelope.
    pub async fn delegate(&self, name: &str, input: AgentInput) -> AgentResult {
        let entry = {
            match self.agents.get(name) {
                Some(entry) => Arc::clone(entry.value()),
                None => {
                    return Err(AgentError::validation(
                        "agent_not_found",
                        format!("no agent registered under '{name}'"),
                    ))
                }
            }
        };
        self.envelope.invoke(&entry, input).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|e| e.value().descriptor.clone())
            .collect()
    }

    /// Status, metrics, and derived health for one agent name.
    pub fn agent_status(&self, name: &str) -> AgentStatus {
        match self.agents.get(name) {
            None => AgentStatus {
                exists: false,
                descriptor: None,
                metrics: None,
                health: None,
            },
            Some(entry) => {
                let snapshot = entry.metrics.snapshot(entry.breaker.state());
                let health = derive_health(&snapshot);
                AgentStatus {
                    exists: true,
                    descriptor: Some(entry.descriptor.clone()),
                    metrics: Some(snapshot),
                    health: Some(health),
                }
            }
        }
    }

    /// Per-agent metrics snapshots for the health aggregator.
    pub fn metrics_snapshots(&self) -> Vec<(String, MetricsSnapshot)> {
        self.agents
            .iter()
            .map(|e| {
                let entry = e.value();
                (
                    e.key().clone(),
                    entry.metrics.snapshot(entry.breaker.state()),
                )
            })
            .collect()
    }
}

/// Health derivation: healthy iff the breaker is closed and the error
/// rate stays under 10%; degraded while half-open or with an error rate
/// up to 30%; unhealthy otherwise.
fn derive_health(snapshot: &MetricsSnapshot) -> HealthState {
    match snapshot.circuit_breaker_state {
        BreakerState::Open => HealthState::Unhealthy,
        BreakerState::HalfOpen => HealthState::Degraded,
        BreakerState::Closed => {
            if snapshot.error_rate > 0.3 {
                HealthState::Unhealthy
            } else if snapshot.error_rate >= 0.1 {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_config::EnvelopeConfig;
    use conductor_contracts::{
        Agent, AgentOutput, ErrorCategory, ErrorKind, ExecutionContext, RetryOverride, TaskType,
    };
    use conductor_events::EventCollector;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn version(&self) -> &str {
            "1.0.0"
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

    /// Fails with a classified error until `failures` invocations have
    /// happened, then succeeds.
    struct FlakyAgent {
        name: String,
        failures: u32,
        seen: AtomicU32,
        kind: ErrorKind,
    }

    impl FlakyAgent {
        fn new(name: &str, failures: u32, kind: ErrorKind) -> Self {
            Self {
                name: name.to_string(),
                failures,
                seen: AtomicU32::new(0),
                kind,
            }
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        async fn execute(&self, _input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
            let attempt = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                Err(AgentError::new(
                    "upstream_failed",
                    "network unreachable",
                    self.kind,
                ))
            } else {
                Ok(AgentOutput::new(json!({ "attempt": attempt })))
            }
        }
    }

    fn registry() -> (AgentRegistry, EventBus) {
        let bus = EventBus::new();
        let defaults = Arc::new(RwLock::new(EnvelopeConfig::default()));
        let envelope = ExecutionEnvelope::new(bus.clone(), defaults);
        let breaker_config = Arc::new(RwLock::new(BreakerConfig::default()));
        (
            AgentRegistry::new(bus.clone(), envelope, breaker_config, 100),
            bus,
        )
    }

    #[tokio::test]
    async fn happy_path_delegate_augments_metadata_and_emits_events() {
        let (registry, bus) = registry();
        let mut collector = EventCollector::attach(&bus);
        registry.register_agent(Arc::new(EchoAgent)).unwrap();

        let output = registry
            .delegate("echo", AgentInput::with_field("msg", json!("hi")))
            .await
            .unwrap();

        assert_eq!(output.data["echo"], "hi");
        let execution_id = output.metadata["executionId"].as_str().unwrap();
        assert!(execution_id.starts_with("echo-"));
        assert_eq!(output.metadata["attempt"], 1);
        assert_eq!(output.metadata["circuitBreakerState"], "closed");

        assert_eq!(collector.count(EventKind::ExecutionStarted), 1);
        assert_eq!(collector.count(EventKind::ExecutionCompleted), 1);
        assert_eq!(collector.count(EventKind::ExecutionError), 0);
    }

    #[tokio::test]
    async fn unknown_agent_is_a_validation_error() {
        let (registry, _bus) = registry();
        let err = registry
            .delegate("ghost", AgentInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "agent_not_found");
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_and_registry_unchanged() {
        let (registry, _bus) = registry();
        registry.register_agent(Arc::new(EchoAgent)).unwrap();
        let err = registry.register_agent(Arc::new(EchoAgent)).unwrap_err();
        assert_eq!(err.code, "agent_already_registered");
        assert_eq!(registry.agent_names(), vec!["echo".to_string()]);

        // the original registration still works
        let output = registry
            .delegate("echo", AgentInput::with_field("msg", json!("still here")))
            .await
            .unwrap();
        assert_eq!(output.data["echo"], "still here");
    }

    #[tokio::test]
    async fn unregister_removes_agent_breaker_and_metrics() {
        let (registry, _bus) = registry();
        registry.register_agent(Arc::new(EchoAgent)).unwrap();
        assert!(registry.unregister_agent("echo"));
        assert!(!registry.unregister_agent("echo"));

        let status = registry.agent_status("echo");
        assert!(!status.exists);
        assert!(status.metrics.is_none());
        assert!(status.health.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_succeed_reports_second_attempt() {
        let (registry, bus) = registry();
        let mut collector = EventCollector::attach(&bus);
        registry
            .register_agent(Arc::new(FlakyAgent::new("flaky", 1, ErrorKind::Timeout)))
            .unwrap();

        let output = registry
            .delegate("flaky", AgentInput::default())
            .await
            .unwrap();
        assert_eq!(output.metadata["attempt"], 2);

        // one failure event plus one retry-scheduled event, then success
        let errors = collector.of_kind(EventKind::ExecutionError);
        assert_eq!(errors.len(), 2);
        for event in &errors {
            assert_eq!(event.payload["retryable"], true);
            assert_eq!(event.payload["isLastAttempt"], false);
        }
        assert_eq!(errors[1].payload["retryInMs"], 1_000);
        assert_eq!(collector.count(EventKind::ExecutionCompleted), 1);
    }

    #[tokio::test]
    async fn validation_error_skips_retries_breaker_and_metrics() {
        let (registry, bus) = registry();
        let mut collector = EventCollector::attach(&bus);
        registry.register_agent(Arc::new(EchoAgent)).unwrap();

        let err = registry
            .delegate("echo", AgentInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "missing_msg");
        assert_eq!(err.category, ErrorCategory::Validation);

        let status = registry.agent_status("echo");
        let metrics = status.metrics.unwrap();
        assert_eq!(metrics.total_executions, 0);
        assert_eq!(metrics.failed_executions, 0);
        assert_eq!(metrics.circuit_breaker_state, BreakerState::Closed);

        // a single terminal error event, no retries
        let errors = collector.of_kind(EventKind::ExecutionError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["isLastAttempt"], true);
    }

    #[tokio::test]
    async fn non_positive_timeout_is_rejected_at_entry() {
        let (registry, _bus) = registry();
        registry.register_agent(Arc::new(EchoAgent)).unwrap();

        let mut input = AgentInput::with_field("msg", json!("hi"));
        input.timeout_ms = Some(0);
        let err = registry.delegate("echo", input).await.unwrap_err();
        assert_eq!(err.code, "invalid_timeout");
        assert_eq!(err.category, ErrorCategory::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_classified_and_counted() {
        struct SlowAgent;

        #[async_trait]
        impl Agent for SlowAgent {
            fn name(&self) -> &str {
                "slow"
            }
            fn version(&self) -> &str {
                "0.1.0"
            }
            async fn execute(&self, _input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(AgentOutput::new(json!({})))
            }
        }

        let (registry, _bus) = registry();
        registry.register_agent(Arc::new(SlowAgent)).unwrap();

        let mut input = AgentInput::default();
        input.timeout_ms = Some(50);
        input.retry_policy = Some(RetryOverride {
            max_retries: Some(1),
            initial_delay_ms: Some(10),
            ..Default::default()
        });

        let err = registry.delegate("slow", input).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Timeout);

        // two attempts, two breaker failures
        let metrics = registry.agent_status("slow").metrics.unwrap();
        assert_eq!(metrics.failed_executions, 2);
    }

    #[tokio::test]
    async fn breaker_trips_and_refuses_immediately() {
        let (registry, bus) = registry();
        let mut collector = EventCollector::attach(&bus);
        registry
            .register_agent(Arc::new(FlakyAgent::new(
                "always-down",
                u32::MAX,
                ErrorKind::Network,
            )))
            .unwrap();

        let no_retry = RetryOverride {
            max_retries: Some(0),
            ..Default::default()
        };
        for _ in 0..5 {
            let mut input = AgentInput::default();
            input.retry_policy = Some(no_retry.clone());
            let err = registry.delegate("always-down", input).await.unwrap_err();
            assert_eq!(err.category, ErrorCategory::System);
        }
        assert_eq!(collector.count(EventKind::BreakerOpened), 1);

        let mut input = AgentInput::default();
        input.retry_policy = Some(no_retry);
        let err = registry.delegate("always-down", input).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::CircuitBreaker);
        assert!(!err.retryable);
        assert_eq!(err.metadata["circuitBreakerState"], "open");
        // still exactly one opening
        assert_eq!(collector.count(EventKind::BreakerOpened), 1);
    }

    #[tokio::test]
    async fn panicking_agent_is_converted_to_execution_error() {
        struct PanickyAgent;

        #[async_trait]
        impl Agent for PanickyAgent {
            fn name(&self) -> &str {
                "panicky"
            }
            fn version(&self) -> &str {
                "0.1.0"
            }
            async fn execute(&self, _input: AgentInput, _ctx: ExecutionContext) -> AgentResult {
                panic!("boom");
            }
        }

        let (registry, _bus) = registry();
        registry.register_agent(Arc::new(PanickyAgent)).unwrap();
        let err = registry
            .delegate("panicky", AgentInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "agent_panicked");
        assert_eq!(err.category, ErrorCategory::Execution);
    }

    #[tokio::test]
    async fn agent_status_derives_health_from_error_rate() {
        let (registry, _bus) = registry();
        registry
            .register_agent(Arc::new(FlakyAgent::new("mostly-ok", 1, ErrorKind::Execution)))
            .unwrap();

        // first call fails (execution errors are not retryable), rest succeed
        let _ = registry.delegate("mostly-ok", AgentInput::default()).await;
        for _ in 0..9 {
            registry
                .delegate("mostly-ok", AgentInput::default())
                .await
                .unwrap();
        }

        let status = registry.agent_status("mostly-ok");
        let metrics = status.metrics.as_ref().unwrap();
        assert_eq!(metrics.total_executions, 10);
        // 1/10 failure rate sits on the degraded boundary
        assert_eq!(status.health, Some(HealthState::Degraded));
    }

    #[tokio::test]
    async fn error_metadata_carries_attempt_history() {
        let (registry, _bus) = registry();
        registry
            .register_agent(Arc::new(FlakyAgent::new(
                "doomed",
                u32::MAX,
                ErrorKind::Temporary,
            )))
            .unwrap();

        let mut input = AgentInput::default();
        input.retry_policy = Some(RetryOverride {
            max_retries: Some(2),
            initial_delay_ms: Some(1),
            ..Default::default()
        });
        let err = registry.delegate("doomed", input).await.unwrap_err();
        let attempts = err.metadata["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2]["attempt"], 3);
        assert_eq!(err.metadata["attempt"], 3);
    }
}
