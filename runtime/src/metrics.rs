//! Per-agent execution metrics.
//!
//! Durations are kept in a fixed-capacity ring so updates stay O(1)
//! regardless of history length. The breaker state is mirrored into the
//! snapshot for reporting; the breaker itself stays authoritative.

use conductor_resilience::BreakerState;
use parking_lot::Mutex;
use serde::Serialize;

struct MetricsCore {
    total: u64,
    successful: u64,
    failed: u64,
    durations: Vec<u64>,
    next: usize,
    filled: usize,
    last_duration_ms: u64,
}

/// Rolling execution metrics for one agent.
pub struct AgentMetrics {
    window: usize,
    core: Mutex<MetricsCore>,
}

impl AgentMetrics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            core: Mutex::new(MetricsCore {
                total: 0,
                successful: 0,
                failed: 0,
                durations: vec![0; window],
                next: 0,
                filled: 0,
                last_duration_ms: 0,
            }),
        }
    }

    pub fn record_success(&self, duration_ms: u64) {
        self.record(duration_ms, true);
    }

    pub fn record_failure(&self, duration_ms: u64) {
        self.record(duration_ms, false);
    }

    fn record(&self, duration_ms: u64, success: bool) {
        let mut core = self.core.lock();
        core.total += 1;
        if success {
            core.successful += 1;
        } else {
            core.failed += 1;
        }
        let slot = core.next;
        core.durations[slot] = duration_ms;
        core.next = (slot + 1) % self.window;
        if core.filled < self.window {
            core.filled += 1;
        }
        core.last_duration_ms = duration_ms;
    }

    /// Zero every counter and the duration window.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        core.total = 0;
        core.successful = 0;
        core.failed = 0;
        core.durations.iter_mut().for_each(|d| *d = 0);
        core.next = 0;
        core.filled = 0;
        core.last_duration_ms = 0;
    }

    pub fn snapshot(&self, breaker_state: BreakerState) -> MetricsSnapshot {
        let core = self.core.lock();
        let average = if core.filled == 0 {
            0.0
        } else {
            let sum: u64 = core.durations[..core.filled].iter().sum();
            sum as f64 / core.filled as f64
        };
        let error_rate = if core.total == 0 {
            0.0
        } else {
            core.failed as f64 / core.total as f64
        };
        MetricsSnapshot {
            total_executions: core.total,
            successful_executions: core.successful,
            failed_executions: core.failed,
            error_rate,
            average_execution_time_ms: average,
            last_execution_time_ms: core.last_duration_ms,
            circuit_breaker_state: breaker_state,
        }
    }
}

/// Point-in-time metrics view, with the breaker state mirrored so the
/// pair reads consistently.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub error_rate: f64,
    pub average_execution_time_ms: f64,
    pub last_execution_time_ms: u64,
    pub circuit_breaker_state: BreakerState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_rates() {
        let metrics = AgentMetrics::new(100);
        metrics.record_success(10);
        metrics.record_success(20);
        metrics.record_failure(30);

        let snap = metrics.snapshot(BreakerState::Closed);
        assert_eq!(snap.total_executions, 3);
        assert_eq!(snap.successful_executions, 2);
        assert_eq!(snap.failed_executions, 1);
        assert!((snap.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((snap.average_execution_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snap.last_execution_time_ms, 30);
    }

    #[test]
    fn window_overwrites_circularly() {
        let metrics = AgentMetrics::new(3);
        for duration in [10, 20, 30, 100] {
            metrics.record_success(duration);
        }
        // window now holds 100, 20, 30
        let snap = metrics.snapshot(BreakerState::Closed);
        assert!((snap.average_execution_time_ms - 50.0).abs() < 1e-9);
        assert_eq!(snap.total_executions, 4);
    }

    #[test]
    fn average_ignores_unfilled_slots() {
        let metrics = AgentMetrics::new(100);
        metrics.record_success(40);
        let snap = metrics.snapshot(BreakerState::Closed);
        assert!((snap.average_execution_time_ms - 40.0).abs() < 1e-9);
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = AgentMetrics::new(10);
        metrics.record_failure(50);
        metrics.reset();
        let snap = metrics.snapshot(BreakerState::Closed);
        assert_eq!(snap.total_executions, 0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.average_execution_time_ms, 0.0);
        assert_eq!(snap.last_execution_time_ms, 0);
    }

    #[test]
    fn empty_metrics_have_zero_rate() {
        let metrics = AgentMetrics::new(10);
        let snap = metrics.snapshot(BreakerState::Closed);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.total_executions, 0);
    }
}
