//! The conductor kernel facade.
//!
//! Construction wires every subsystem from one [`KernelConfig`] value:
//! event bus, registry and envelope, model router, workflow engine, smart
//! router, scheduler, and health aggregator. There are no singletons;
//! tests build a fresh kernel per case. The hosting process owns the
//! transport and calls the in-process API exposed here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use conductor_config::{EnvelopeConfig, KernelConfig};
use conductor_contracts::{
    Agent, AgentDescriptor, AgentInput, AgentResult, CapabilityClass, ModelProvider, RetryPolicy,
    TaskKind, TaskRecord, TaskRequest, TaskStatus, TaskType, TriggerKind, WorkflowDefinition,
    WorkflowExecution,
};
use conductor_events::{EventBus, EventStream};
use conductor_health::{HealthAggregator, HealthReport};
use conductor_model_router::{ModelRouter, ModelStats};
use conductor_orchestration::{SmartRouter, WorkflowEngine};
use conductor_resilience::BreakerConfig;
use conductor_runtime::{
    AgentRegistry, AgentStatus, ExecutionEnvelope, SharedEnvelopeConfig,
};
use conductor_scheduler::{SchedulerStats, TaskScheduler};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::info;

/// The hot-reloadable configuration subset. Absent fields keep their
/// current values; changes apply to future invocations only.
#[derive(Debug, Default, Clone)]
pub struct ReloadUpdate {
    pub retry: Option<RetryPolicy>,
    pub breaker: Option<BreakerConfig>,
    pub preferences: Option<HashMap<TaskType, Vec<CapabilityClass>>>,
    pub queue_bound: Option<usize>,
}

pub struct ConductorKernel {
    bus: EventBus,
    registry: Arc<AgentRegistry>,
    model_router: Arc<ModelRouter>,
    workflows: Arc<WorkflowEngine>,
    smart_router: SmartRouter,
    scheduler: Arc<TaskScheduler>,
    health: Arc<HealthAggregator>,
    envelope_defaults: SharedEnvelopeConfig,
    breaker_config: Arc<RwLock<BreakerConfig>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ConductorKernel {
    /// Build a kernel from a validated configuration. Provider adapters
    /// and agents are wired afterwards by the host.
    pub fn new(config: KernelConfig) -> anyhow::Result<Self> {
        config.validate().context("kernel configuration rejected")?;

        let bus = EventBus::new();
        let envelope_defaults: SharedEnvelopeConfig =
            Arc::new(RwLock::new(config.envelope.clone()));
        let breaker_config = Arc::new(RwLock::new(config.breaker.clone()));

        let envelope = ExecutionEnvelope::new(bus.clone(), Arc::clone(&envelope_defaults));
        let registry = Arc::new(AgentRegistry::new(
            bus.clone(),
            envelope,
            Arc::clone(&breaker_config),
            config.metrics.window_size,
        ));
        let model_router = Arc::new(ModelRouter::new(config.router.clone()));
        let workflows = Arc::new(WorkflowEngine::new(
            Arc::clone(&registry),
            bus.clone(),
            config.workflows.clone(),
        ));
        let smart_router = SmartRouter::new(Arc::clone(&registry), Arc::clone(&model_router));
        let scheduler = TaskScheduler::new(
            config.scheduler.clone(),
            bus.clone(),
            Arc::clone(&registry),
            Arc::clone(&workflows),
        );
        let health = Arc::new(HealthAggregator::new(
            Arc::clone(&registry) as Arc<dyn conductor_health::AgentHealthView>,
            Arc::clone(&model_router) as Arc<dyn conductor_health::ProviderHealthView>,
            Arc::clone(&scheduler) as Arc<dyn conductor_health::TaskFlowView>,
            config.health.clone(),
            bus.clone(),
        ));

        info!("conductor kernel constructed");
        Ok(Self {
            bus,
            registry,
            model_router,
            workflows,
            smart_router,
            scheduler,
            health,
            envelope_defaults,
            breaker_config,
            monitor: Mutex::new(None),
        })
    }

    /// Start the scheduler worker. Call once after wiring agents and
    /// providers.
    pub fn start(&self) {
        Arc::clone(&self.scheduler).start();
    }

    /// Start the periodic health monitor.
    pub fn start_health_monitor(&self, interval: Duration) {
        let mut monitor = self.monitor.lock();
        if monitor.is_none() {
            *monitor = Some(Arc::clone(&self.health).spawn_monitor(interval));
        }
    }

    // ---- agents ----------------------------------------------------------

    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> RegistrationResult {
        self.registry.register_agent(agent)
    }

    pub fn unregister_agent(&self, name: &str) -> bool {
        self.registry.unregister_agent(name)
    }

    pub async fn delegate(&self, name: &str, input: AgentInput) -> AgentResult {
        self.registry.delegate(name, input).await
    }

    pub fn agent_status(&self, name: &str) -> AgentStatus {
        self.registry.agent_status(name)
    }

    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.registry.descriptors()
    }

    // ---- model providers -------------------------------------------------

    pub fn register_provider(&self, provider: Arc<dyn ModelProvider>) -> RegistrationResult {
        self.model_router.register_provider(provider)
    }

    pub fn model_stats(&self) -> Vec<ModelStats> {
        self.model_router.model_stats()
    }

    /// Handle to the model router, for wiring model-backed agents.
    pub fn model_router(&self) -> Arc<ModelRouter> {
        Arc::clone(&self.model_router)
    }

    pub fn select_optimal_model(&self, task_type: TaskType) -> Option<String> {
        self.model_router.select_optimal_model(task_type)
    }

    // ---- workflows -------------------------------------------------------

    pub fn register_workflow(&self, definition: WorkflowDefinition) -> RegistrationResult {
        self.workflows.register_workflow(definition)
    }

    pub fn deregister_workflow(&self, id: &str) -> bool {
        self.workflows.deregister_workflow(id)
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Map<String, Value>,
    ) -> AgentResult {
        self.workflows
            .execute(workflow_id, input, TriggerKind::Direct)
            .await
    }

    pub fn workflow_executions(&self) -> Vec<WorkflowExecution> {
        self.workflows.executions()
    }

    // ---- smart routing ---------------------------------------------------

    pub async fn smart_execute(&self, request: &str) -> AgentResult {
        self.smart_router.smart_execute(request).await
    }

    // ---- task submission -------------------------------------------------

    pub fn submit(&self, request: TaskRequest) -> Result<String, conductor_contracts::AgentError> {
        self.scheduler.submit(request)
    }

    pub fn task_status(&self, id: &str) -> TaskStatus {
        self.scheduler.status(id)
    }

    pub fn task_result(&self, id: &str) -> Option<TaskRecord> {
        self.scheduler.result(id)
    }

    pub fn cancel_task(&self, id: &str) -> bool {
        self.scheduler.cancel(id)
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    // ---- observability ---------------------------------------------------

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn health(&self) -> HealthReport {
        self.health.evaluate()
    }

    // ---- reconfiguration -------------------------------------------------

    /// Apply a hot-reload of the supported subset. In-flight executions
    /// keep the configuration they snapshotted at entry.
    pub fn reload(&self, update: ReloadUpdate) {
        if let Some(retry) = update.retry {
            self.envelope_defaults.write().retry = retry;
        }
        if let Some(breaker) = update.breaker {
            *self.breaker_config.write() = breaker;
        }
        if let Some(preferences) = update.preferences {
            self.model_router.set_preferences(preferences);
        }
        if let Some(bound) = update.queue_bound {
            self.scheduler.set_queue_bound(bound);
        }
        info!("kernel configuration reloaded");
    }

    /// Current envelope defaults (primarily for inspection in tests).
    pub fn envelope_defaults(&self) -> EnvelopeConfig {
        self.envelope_defaults.read().clone()
    }

    /// Route table reload for non-workflow task kinds.
    pub fn set_task_routes(&self, routes: HashMap<TaskKind, String>) {
        self.scheduler.set_routes(routes);
    }

    // ---- lifecycle -------------------------------------------------------

    /// Stop intake, drain the active task up to the configured grace
    /// deadline, and stop background loops.
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        self.scheduler.shutdown().await;
        info!("conductor kernel stopped");
    }
}

/// Shorthand for registration-style results.
type RegistrationResult = Result<(), conductor_contracts::AgentError>;
