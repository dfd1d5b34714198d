//! Configuration validation.

use crate::KernelConfig;

/// Every violation found in one pass over the configuration.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid kernel configuration: {}", violations.join("; "))]
pub struct ConfigValidationError {
    pub violations: Vec<String>,
}

pub(crate) fn validate(config: &KernelConfig) -> Result<(), ConfigValidationError> {
    let mut violations = Vec::new();

    if config.envelope.default_timeout_ms == 0 {
        violations.push("envelope.default_timeout_ms must be positive".into());
    }
    if config.envelope.retry.backoff_multiplier < 1.0 {
        violations.push("envelope.retry.backoff_multiplier must be >= 1".into());
    }
    if config.envelope.retry.max_delay_ms < config.envelope.retry.initial_delay_ms {
        violations.push("envelope.retry.max_delay_ms must be >= initial_delay_ms".into());
    }

    if config.breaker.failure_threshold == 0 {
        violations.push("breaker.failure_threshold must be positive".into());
    }
    if config.breaker.half_open_max_requests == 0 {
        violations.push("breaker.half_open_max_requests must be positive".into());
    }
    if config.breaker.recovery_timeout_ms == 0 {
        violations.push("breaker.recovery_timeout_ms must be positive".into());
    }

    if config.metrics.window_size == 0 {
        violations.push("metrics.window_size must be positive".into());
    }

    if config.router.request_timeout_ms == 0 {
        violations.push("router.request_timeout_ms must be positive".into());
    }
    for (task_type, classes) in &config.router.preferences {
        if classes.is_empty() {
            violations.push(format!(
                "router.preferences for {} must name at least one capability class",
                task_type.as_str()
            ));
        }
    }

    if config.scheduler.queue_bound == 0 {
        violations.push("scheduler.queue_bound must be positive".into());
    }
    if config.scheduler.history_bound == 0 {
        violations.push("scheduler.history_bound must be positive".into());
    }

    if config.workflows.history_bound == 0 {
        violations.push("workflows.history_bound must be positive".into());
    }

    if !(0.0..=1.0).contains(&config.health.queue_depth_ratio)
        || config.health.queue_depth_ratio == 0.0
    {
        violations.push("health.queue_depth_ratio must be in (0, 1]".into());
    }
    if config.health.degraded_error_rate >= config.health.unhealthy_error_rate {
        violations.push("health.degraded_error_rate must be below unhealthy_error_rate".into());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigValidationError { violations })
    }
}
