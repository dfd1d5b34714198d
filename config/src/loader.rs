//! Configuration loading.
//!
//! A host can build its [`KernelConfig`] in code, load it from a JSON
//! file, or both. Environment variables override the most commonly tuned
//! fields so deployments can adjust them without editing files.

use std::path::Path;

use anyhow::{Context, Result};

use crate::KernelConfig;

/// Environment variables recognized by [`apply_env_overrides`].
const ENV_DEFAULT_TIMEOUT_MS: &str = "CONDUCTOR_DEFAULT_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "CONDUCTOR_MAX_RETRIES";
const ENV_FAILURE_THRESHOLD: &str = "CONDUCTOR_FAILURE_THRESHOLD";
const ENV_RECOVERY_TIMEOUT_MS: &str = "CONDUCTOR_RECOVERY_TIMEOUT_MS";
const ENV_QUEUE_BOUND: &str = "CONDUCTOR_QUEUE_BOUND";
const ENV_METRICS_WINDOW: &str = "CONDUCTOR_METRICS_WINDOW";
const ENV_PROBE_INTERVAL_MS: &str = "CONDUCTOR_PROBE_INTERVAL_MS";
const ENV_REQUEST_TIMEOUT_MS: &str = "CONDUCTOR_REQUEST_TIMEOUT_MS";

/// Load a configuration from a JSON file. Missing sections fall back to
/// their defaults; the result is validated before being returned.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<KernelConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading kernel config from {}", path.display()))?;
    let mut config: KernelConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing kernel config from {}", path.display()))?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Build the default configuration with environment overrides applied.
pub fn load_from_env() -> Result<KernelConfig> {
    let mut config = KernelConfig::default();
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Overlay recognized environment variables onto a configuration.
/// Unparseable values are ignored rather than failing startup.
pub fn apply_env_overrides(config: &mut KernelConfig) {
    if let Some(value) = env_parse::<u64>(ENV_DEFAULT_TIMEOUT_MS) {
        config.envelope.default_timeout_ms = value;
    }
    if let Some(value) = env_parse::<u32>(ENV_MAX_RETRIES) {
        config.envelope.retry.max_retries = value;
    }
    if let Some(value) = env_parse::<u32>(ENV_FAILURE_THRESHOLD) {
        config.breaker.failure_threshold = value;
    }
    if let Some(value) = env_parse::<u64>(ENV_RECOVERY_TIMEOUT_MS) {
        config.breaker.recovery_timeout_ms = value;
    }
    if let Some(value) = env_parse::<usize>(ENV_QUEUE_BOUND) {
        config.scheduler.queue_bound = value;
    }
    if let Some(value) = env_parse::<usize>(ENV_METRICS_WINDOW) {
        config.metrics.window_size = value;
    }
    if let Some(value) = env_parse::<u64>(ENV_PROBE_INTERVAL_MS) {
        config.router.probe_interval_ms = value;
    }
    if let Some(value) = env_parse::<u64>(ENV_REQUEST_TIMEOUT_MS) {
        config.router.request_timeout_ms = value;
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_partial_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"envelope": {{"default_timeout_ms": 5000, "retry": {{
                "max_retries": 1, "initial_delay_ms": 100,
                "backoff_multiplier": 2.0, "max_delay_ms": 1000,
                "retryable_error_kinds": ["timeout"]
            }}}}}}"#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.envelope.default_timeout_ms, 5_000);
        assert_eq!(config.envelope.retry.max_retries, 1);
        // untouched sections keep their defaults
        assert_eq!(config.scheduler.history_bound, 1_000);
    }

    #[test]
    fn rejects_invalid_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn rejects_configs_that_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // degraded threshold above the unhealthy threshold
        write!(
            file,
            r#"{{"health": {{"degraded_error_rate": 0.6, "unhealthy_error_rate": 0.5, "queue_depth_ratio": 0.8}}}}"#
        )
        .unwrap();
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn env_overrides_take_effect_and_ignore_garbage() {
        std::env::set_var(ENV_QUEUE_BOUND, "123");
        std::env::set_var(ENV_MAX_RETRIES, "not-a-number");
        let mut config = KernelConfig::default();
        apply_env_overrides(&mut config);
        std::env::remove_var(ENV_QUEUE_BOUND);
        std::env::remove_var(ENV_MAX_RETRIES);

        assert_eq!(config.scheduler.queue_bound, 123);
        // the unparseable override left the default in place
        assert_eq!(config.envelope.retry.max_retries, 3);
    }
}
