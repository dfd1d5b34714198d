//! The uniform execution envelope.
//!
//! Every agent invocation passes through here exactly once: execution-id
//! minting, input redaction for emitted payloads, the breaker gate, the
//! timeout race, categorized retries with exponential backoff, metrics
//! recording, and lifecycle events, in that order. The agent sees the
//! original input; the sanitized copy exists only for emission.

use std::sync::Arc;
use std::time::Duration;

use conductor_config::EnvelopeConfig;
use conductor_contracts::{
    sanitize_map, AgentError, AgentInput, AgentResult, ErrorCategory, EventKind, ExecutionContext,
};
use conductor_events::EventBus;
use conductor_resilience::{backoff_delay, BreakerRejection};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::registry::AgentEntry;

/// Hot-reloadable envelope defaults. Each invocation snapshots the value
/// at entry, so a reload never affects an in-flight execution.
pub type SharedEnvelopeConfig = Arc<RwLock<EnvelopeConfig>>;

pub struct ExecutionEnvelope {
    bus: EventBus,
    defaults: SharedEnvelopeConfig,
}

impl ExecutionEnvelope {
    pub fn new(bus: EventBus, defaults: SharedEnvelopeConfig) -> Self {
        Self { bus, defaults }
    }

    /// Execute one agent invocation under the full envelope contract.
    pub async fn invoke(&self, entry: &AgentEntry, input: AgentInput) -> AgentResult {
        let agent_name = entry.descriptor.name.clone();
        let defaults = self.defaults.read().clone();
        let ctx = ExecutionContext::new(&agent_name, &input);
        let execution_id = ctx.execution_id.clone();
        let started = Instant::now();
        let sanitized_input = Value::Object(sanitize_map(&input.payload));

        self.bus.emit(
            EventKind::ExecutionStarted,
            &agent_name,
            json!({
                "agentName": agent_name,
                "executionId": execution_id,
                "input": sanitized_input,
            }),
        );

        let timeout_ms = match input.timeout_ms {
            Some(ms) if ms <= 0 => {
                let err = AgentError::validation(
                    "invalid_timeout",
                    format!("timeout must be positive, got {ms}ms"),
                );
                return Err(self.finish_error(entry, &execution_id, err, 1, started));
            }
            Some(ms) => ms as u64,
            None => defaults.default_timeout_ms,
        };
        let policy = defaults.retry.merged(input.retry_policy.as_ref());

        let mut attempt_history: Vec<Value> = Vec::new();
        let mut attempt: u32 = 0;
        loop {
            let admission = match entry.breaker.admit() {
                Ok(admission) => admission,
                Err(rejection) => {
                    let err = self.breaker_refusal(&agent_name, rejection);
                    return Err(self.finish_error(entry, &execution_id, err, attempt + 1, started));
                }
            };

            let result = self.run_attempt(entry, &input, &ctx, timeout_ms).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(mut output) => {
                    {
                        let _consistent = entry.record_lock.lock();
                        admission.record_success();
                        entry.metrics.record_success(elapsed_ms);
                    }
                    self.bus.emit(
                        EventKind::ExecutionCompleted,
                        &agent_name,
                        json!({
                            "agentName": agent_name,
                            "executionId": execution_id,
                            "attempt": attempt + 1,
                            "executionTimeMs": elapsed_ms,
                        }),
                    );
                    output.execution_time_ms = elapsed_ms;
                    output
                        .metadata
                        .insert("executionId".to_string(), Value::from(execution_id));
                    output
                        .metadata
                        .insert("attempt".into(), Value::from(attempt + 1));
                    output.metadata.insert(
                        "circuitBreakerState".into(),
                        Value::from(entry.breaker.state().as_str()),
                    );
                    return Ok(output);
                }
                Err(mut err) => {
                    err.execution_time_ms = elapsed_ms;

                    // Validation shortcuts the loop: no retries, no
                    // breaker or metrics impact. Dropping the admission
                    // releases any half-open slot without a transition.
                    if err.category == ErrorCategory::Validation {
                        drop(admission);
                        return Err(self.finish_error(
                            entry,
                            &execution_id,
                            err,
                            attempt + 1,
                            started,
                        ));
                    }

                    {
                        let _consistent = entry.record_lock.lock();
                        admission.record_failure();
                        entry.metrics.record_failure(elapsed_ms);
                    }

                    attempt_history.push(json!({
                        "attempt": attempt + 1,
                        "code": err.code,
                        "kind": err.kind.as_str(),
                        "message": err.message,
                    }));

                    let will_retry = err.retryable
                        && policy.retries_kind(err.kind)
                        && attempt < policy.max_retries;

                    self.emit_error(&agent_name, &execution_id, &err, attempt + 1, !will_retry);

                    if will_retry {
                        let delay = backoff_delay(
                            policy.initial_delay_ms,
                            policy.backoff_multiplier,
                            policy.max_delay_ms,
                            attempt,
                        );
                        self.bus.emit(
                            EventKind::ExecutionError,
                            &agent_name,
                            json!({
                                "agentName": agent_name,
                                "executionId": execution_id,
                                "attempt": attempt + 1,
                                "retryable": true,
                                "isLastAttempt": false,
                                "retryInMs": delay.as_millis() as u64,
                            }),
                        );
                        debug!(
                            agent = %agent_name,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after classified failure"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let err = self.augment_error(entry, &execution_id, err, attempt + 1);
                    let err = err.with_metadata("attempts", Value::from(attempt_history));
                    return Err(err);
                }
            }
        }
    }

    /// Race one agent attempt against the deadline. The agent future runs
    /// in its own task so a panic is caught at this boundary, and an
    /// expired deadline aborts the task rather than leaking it.
    async fn run_attempt(
        &self,
        entry: &AgentEntry,
        input: &AgentInput,
        ctx: &ExecutionContext,
        timeout_ms: u64,
    ) -> AgentResult {
        let agent = Arc::clone(&entry.agent);
        let attempt_input = input.clone();
        let attempt_ctx = ctx.clone();
        let mut join = tokio::spawn(async move { agent.execute(attempt_input, attempt_ctx).await });
        tokio::select! {
            joined = &mut join => match joined {
                Ok(result) => result,
                Err(join_err) => Err(AgentError::execution(
                    "agent_panicked",
                    format!("agent body aborted: {join_err}"),
                )),
            },
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                join.abort();
                Err(AgentError::timeout(format!(
                    "execution timed out after {timeout_ms}ms"
                )))
            }
        }
    }

    fn breaker_refusal(&self, agent_name: &str, rejection: BreakerRejection) -> AgentError {
        warn!(agent = %agent_name, "invocation refused by circuit breaker");
        AgentError::circuit_open(rejection.to_string())
            .with_metadata("breakerState", Value::from(rejection.state.as_str()))
            .with_metadata("retryAfterMs", Value::from(rejection.retry_after_ms))
    }

    /// Emit the terminal error event and attach standard metadata.
    fn finish_error(
        &self,
        entry: &AgentEntry,
        execution_id: &str,
        mut err: AgentError,
        attempt: u32,
        started: Instant,
    ) -> AgentError {
        if err.execution_time_ms == 0 {
            err.execution_time_ms = started.elapsed().as_millis() as u64;
        }
        self.emit_error(&entry.descriptor.name, execution_id, &err, attempt, true);
        self.augment_error(entry, execution_id, err, attempt)
    }

    fn emit_error(
        &self,
        agent_name: &str,
        execution_id: &str,
        err: &AgentError,
        attempt: u32,
        is_last: bool,
    ) {
        self.bus.emit(
            EventKind::ExecutionError,
            agent_name,
            json!({
                "agentName": agent_name,
                "executionId": execution_id,
                "attempt": attempt,
                "code": err.code,
                "category": err.category.as_str(),
                "retryable": err.retryable,
                "isLastAttempt": is_last,
                "message": err.message,
            }),
        );
    }

    fn augment_error(
        &self,
        entry: &AgentEntry,
        execution_id: &str,
        err: AgentError,
        attempt: u32,
    ) -> AgentError {
        err.with_metadata("executionId", Value::from(execution_id))
            .with_metadata("attempt", Value::from(attempt))
            .with_metadata(
                "circuitBreakerState",
                Value::from(entry.breaker.state().as_str()),
            )
    }
}
