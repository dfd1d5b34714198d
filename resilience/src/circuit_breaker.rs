//! Circuit breaker.
//!
//! A classic 3-state machine guarding one agent:
//! - CLOSED: normal operation, failures counted
//! - OPEN: refuse every call until the recovery timeout elapses
//! - HALF-OPEN: admit a bounded number of concurrent probe calls
//!
//! Transitions: closed -> open when the failure count reaches the
//! threshold; open -> half-open on the first admission attempt after the
//! recovery timeout; half-open -> closed on a success, half-open -> open
//! on any failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing, reject requests.
    Open,
    /// Probing recovery with bounded concurrency.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing recovery (ms).
    pub recovery_timeout_ms: u64,
    /// Concurrent admissions allowed while half-open.
    pub half_open_max_requests: u32,
    /// Metrics windowing hint; does not affect breaker state.
    pub monitoring_period_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_requests: 3,
            monitoring_period_ms: 60_000,
        }
    }
}

/// Refusal returned when the breaker is open or half-open capacity is
/// exhausted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker is {} (next admission in {retry_after_ms}ms)", .state.as_str())]
pub struct BreakerRejection {
    pub state: BreakerState,
    pub failure_count: u32,
    /// Milliseconds until the next admission window opens. Zero when the
    /// refusal is due to exhausted half-open capacity.
    pub retry_after_ms: u64,
}

/// Point-in-time view for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub half_open_in_flight: u32,
}

/// Called with the new state on every transition, outside the breaker
/// lock, so the runtime can publish breaker events.
pub type TransitionHook = Arc<dyn Fn(BreakerState) + Send + Sync>;

struct BreakerCore {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Per-agent circuit breaker. `admit` gates entry; the returned
/// [`Admission`] must be settled with `record_success` or
/// `record_failure` (dropping it unsettled releases any half-open slot
/// without a state change, so a panic cannot leak capacity).
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    half_open_in_flight: AtomicU32,
    on_transition: RwLock<Option<TransitionHook>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            half_open_in_flight: AtomicU32::new(0),
            on_transition: RwLock::new(None),
        }
    }

    /// Install the transition hook. Replaces any previous hook.
    pub fn set_transition_hook(&self, hook: TransitionHook) {
        *self.on_transition.write() = Some(hook);
    }

    /// Request admission for one call.
    pub fn admit(&self) -> Result<Admission<'_>, BreakerRejection> {
        let mut transition = None;
        let decision = {
            let mut core = self.core.lock();
            match core.state {
                BreakerState::Closed => Ok(false),
                BreakerState::Open => {
                    let elapsed = core
                        .last_failure_at
                        .map(|at| at.elapsed())
                        .unwrap_or(Duration::MAX);
                    let recovery = Duration::from_millis(self.config.recovery_timeout_ms);
                    if elapsed >= recovery {
                        core.state = BreakerState::HalfOpen;
                        transition = Some(BreakerState::HalfOpen);
                        self.try_take_half_open_slot(&core)
                    } else {
                        let remaining = recovery - elapsed;
                        Err(BreakerRejection {
                            state: BreakerState::Open,
                            failure_count: core.failure_count,
                            retry_after_ms: remaining.as_millis() as u64,
                        })
                    }
                }
                BreakerState::HalfOpen => self.try_take_half_open_slot(&core),
            }
        };
        if let Some(state) = transition {
            debug!(breaker = %self.name, "circuit breaker half-open, probing recovery");
            self.notify(state);
        }
        decision.map(|half_open| Admission {
            breaker: self,
            half_open,
            settled: false,
        })
    }

    fn try_take_half_open_slot(&self, core: &BreakerCore) -> Result<bool, BreakerRejection> {
        let max = self.config.half_open_max_requests;
        let mut current = self.half_open_in_flight.load(Ordering::Acquire);
        loop {
            if current >= max {
                return Err(BreakerRejection {
                    state: BreakerState::HalfOpen,
                    failure_count: core.failure_count,
                    retry_after_ms: 0,
                });
            }
            match self.half_open_in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(true),
                Err(observed) => current = observed,
            }
        }
    }

    fn settle(&self, success: bool, half_open_slot: bool) {
        let mut transition = None;
        {
            let mut core = self.core.lock();
            if success {
                if core.state == BreakerState::HalfOpen {
                    core.state = BreakerState::Closed;
                    transition = Some(BreakerState::Closed);
                }
                core.failure_count = 0;
            } else {
                core.last_failure_at = Some(Instant::now());
                match core.state {
                    BreakerState::HalfOpen => {
                        core.state = BreakerState::Open;
                        transition = Some(BreakerState::Open);
                    }
                    BreakerState::Closed => {
                        core.failure_count += 1;
                        if core.failure_count >= self.config.failure_threshold {
                            core.state = BreakerState::Open;
                            transition = Some(BreakerState::Open);
                        }
                    }
                    // A straggler admitted before the breaker opened; the
                    // failure timestamp extends the recovery window.
                    BreakerState::Open => {}
                }
            }
        }
        if half_open_slot {
            self.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        match transition {
            Some(BreakerState::Open) => {
                warn!(breaker = %self.name, "circuit breaker opened");
                self.notify(BreakerState::Open);
            }
            Some(BreakerState::Closed) => {
                debug!(breaker = %self.name, "circuit breaker closed after successful probe");
                self.notify(BreakerState::Closed);
            }
            _ => {}
        }
    }

    fn notify(&self, state: BreakerState) {
        let hook = self.on_transition.read().clone();
        if let Some(hook) = hook {
            hook(state);
        }
    }

    pub fn state(&self) -> BreakerState {
        self.core.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.core.lock();
        BreakerSnapshot {
            state: core.state,
            failure_count: core.failure_count,
            half_open_in_flight: self.half_open_in_flight.load(Ordering::Acquire),
        }
    }

    /// Force the breaker open, e.g. for manual intervention.
    pub fn force_open(&self) {
        let mut core = self.core.lock();
        core.state = BreakerState::Open;
        core.last_failure_at = Some(Instant::now());
        drop(core);
        self.notify(BreakerState::Open);
    }

    /// Reset to closed and zero the failure count.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let was_closed = core.state == BreakerState::Closed;
        core.state = BreakerState::Closed;
        core.failure_count = 0;
        core.last_failure_at = None;
        drop(core);
        if !was_closed {
            self.notify(BreakerState::Closed);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .field("half_open_in_flight", &snapshot.half_open_in_flight)
            .finish()
    }
}

/// Permission for one call, returned by [`CircuitBreaker::admit`].
#[must_use = "an admission must be settled with record_success or record_failure"]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    settled: bool,
}

impl Admission<'_> {
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(true, self.half_open);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(false, self.half_open);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.half_open {
            self.breaker
                .half_open_in_flight
                .fetch_sub(1, Ordering::AcqRel);
        }
    }
}
