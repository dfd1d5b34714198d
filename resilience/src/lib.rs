//! Resilience primitives for the conductor kernel.
//!
//! Circuit breakers isolate failing agents and probe recovery; the
//! backoff module provides the delay math the runtime envelope uses
//! between retry attempts.

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{backoff_delay, jittered};
pub use circuit_breaker::{
    Admission, BreakerConfig, BreakerRejection, BreakerSnapshot, BreakerState, CircuitBreaker,
    TransitionHook,
};
