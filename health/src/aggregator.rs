//! The health aggregation rules.
//!
//! Unhealthy: a capability class with every provider down, a task error
//! rate above the unhealthy threshold, or queue depth beyond its ratio of
//! the bound. Degraded: any open breaker, any degraded agent, or a task
//! error rate above the degraded threshold. Healthy otherwise.

use std::sync::Arc;
use std::time::Duration;

use conductor_config::HealthConfig;
use conductor_contracts::{EventKind, HealthState};
use conductor_events::EventBus;
use conductor_resilience::BreakerState;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use crate::views::{
    AgentHealthSample, AgentHealthView, ClassAvailability, ProviderHealthView, TaskFlowView,
};

/// Per-component detail attached to a report.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub agents: Vec<AgentHealthSample>,
    pub providers: Vec<ClassAvailability>,
    pub queue_depth: usize,
    pub queue_bound: usize,
    pub task_error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub components: ComponentReport,
}

pub struct HealthAggregator {
    agents: Arc<dyn AgentHealthView>,
    providers: Arc<dyn ProviderHealthView>,
    tasks: Arc<dyn TaskFlowView>,
    config: HealthConfig,
    bus: EventBus,
    last: Mutex<Option<HealthState>>,
}

impl HealthAggregator {
    pub fn new(
        agents: Arc<dyn AgentHealthView>,
        providers: Arc<dyn ProviderHealthView>,
        tasks: Arc<dyn TaskFlowView>,
        config: HealthConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            agents,
            providers,
            tasks,
            config,
            bus,
            last: Mutex::new(None),
        }
    }

    /// Evaluate the rules once, publishing `healthChanged` if the state
    /// moved since the previous evaluation.
    pub fn evaluate(&self) -> HealthReport {
        let agents = self.agents.agent_samples();
        let providers = self.providers.class_samples();
        let queue_depth = self.tasks.queue_depth();
        let queue_bound = self.tasks.queue_bound();
        let task_error_rate = self.tasks.error_rate_last_hour();

        let mut status = HealthState::Healthy;

        // a capability class whose every provider is down has no failover
        if providers
            .iter()
            .any(|class| class.total > 0 && class.available == 0)
        {
            status = status.worst(HealthState::Unhealthy);
        }
        if task_error_rate > self.config.unhealthy_error_rate {
            status = status.worst(HealthState::Unhealthy);
        }
        if queue_bound > 0
            && queue_depth as f64 > self.config.queue_depth_ratio * queue_bound as f64
        {
            status = status.worst(HealthState::Unhealthy);
        }

        for agent in &agents {
            match agent.breaker_state {
                BreakerState::Open | BreakerState::HalfOpen => {
                    status = status.worst(HealthState::Degraded);
                }
                BreakerState::Closed => {
                    if agent.error_rate >= self.config.degraded_error_rate {
                        status = status.worst(HealthState::Degraded);
                    }
                }
            }
        }
        if task_error_rate > self.config.degraded_error_rate {
            status = status.worst(HealthState::Degraded);
        }

        let report = HealthReport {
            status,
            components: ComponentReport {
                agents,
                providers,
                queue_depth,
                queue_bound,
                task_error_rate,
            },
        };

        let mut last = self.last.lock();
        if *last != Some(status) {
            let previous = *last;
            *last = Some(status);
            info!(status = status.as_str(), "system health changed");
            self.bus.emit(
                EventKind::HealthChanged,
                "kernel",
                json!({
                    "status": status.as_str(),
                    "previous": previous.map(|s| s.as_str()),
                    "taskErrorRate": report.components.task_error_rate,
                    "queueDepth": report.components.queue_depth,
                }),
            );
        }

        report
    }

    /// Re-evaluate on an interval until the handle is aborted.
    pub fn spawn_monitor(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let aggregator = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                aggregator.evaluate();
            }
        })
    }
}
