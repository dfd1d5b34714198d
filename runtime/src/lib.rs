//! Agent runtime for the conductor kernel.
//!
//! The registry owns one entry per registered agent: the agent itself,
//! its circuit breaker, and its metrics, created and destroyed together.
//! Every invocation routes through the execution envelope, the single
//! place where timeouts, retries, breaker gating, and lifecycle events
//! are applied.

pub mod envelope;
pub mod metrics;
pub mod registry;

pub use envelope::{ExecutionEnvelope, SharedEnvelopeConfig};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use registry::{AgentRegistry, AgentStatus};
