//! Narrow views the aggregator reads its inputs through.
//!
//! Each kernel subsystem exposes just the sample the health rules need,
//! so the aggregator can be exercised against stubs in tests.

use conductor_contracts::CapabilityClass;
use conductor_model_router::ModelRouter;
use conductor_resilience::BreakerState;
use conductor_runtime::AgentRegistry;
use conductor_scheduler::TaskScheduler;
use serde::Serialize;

/// One agent's contribution to system health.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthSample {
    pub name: String,
    pub breaker_state: BreakerState,
    pub error_rate: f64,
}

/// Provider availability rolled up per capability class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassAvailability {
    pub class: CapabilityClass,
    pub available: usize,
    pub total: usize,
}

pub trait AgentHealthView: Send + Sync {
    fn agent_samples(&self) -> Vec<AgentHealthSample>;
}

pub trait ProviderHealthView: Send + Sync {
    fn class_samples(&self) -> Vec<ClassAvailability>;
}

/// Queue pressure and task outcomes.
pub trait TaskFlowView: Send + Sync {
    fn queue_depth(&self) -> usize;
    fn queue_bound(&self) -> usize;
    fn error_rate_last_hour(&self) -> f64;
}

impl AgentHealthView for AgentRegistry {
    fn agent_samples(&self) -> Vec<AgentHealthSample> {
        self.metrics_snapshots()
            .into_iter()
            .map(|(name, snapshot)| AgentHealthSample {
                name,
                breaker_state: snapshot.circuit_breaker_state,
                error_rate: snapshot.error_rate,
            })
            .collect()
    }
}

impl ProviderHealthView for ModelRouter {
    fn class_samples(&self) -> Vec<ClassAvailability> {
        self.class_availability()
            .into_iter()
            .map(|(class, (available, total))| ClassAvailability {
                class,
                available,
                total,
            })
            .collect()
    }
}

impl TaskFlowView for TaskScheduler {
    fn queue_depth(&self) -> usize {
        self.queue_depth()
    }

    fn queue_bound(&self) -> usize {
        self.queue_bound()
    }

    fn error_rate_last_hour(&self) -> f64 {
        self.error_rate_last_hour()
    }
}
