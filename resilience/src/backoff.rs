//! Retry backoff math.
//!
//! The delay before retry attempt N (zero-based) is
//! `min(initial * multiplier^N, max)`. Jitter is opt-in; the runtime
//! envelope uses the exact delay so the backoff law stays observable.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff delay for a zero-based attempt index.
pub fn backoff_delay(
    initial_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    attempt: u32,
) -> Duration {
    let multiplier = multiplier.max(1.0);
    let raw = initial_delay_ms as f64 * multiplier.powi(attempt as i32);
    let capped = raw.min(max_delay_ms as f64);
    Duration::from_millis(capped as u64)
}

/// Subtract up to `factor` of the delay at random, spreading thundering
/// herds of retries.
pub fn jittered(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let millis = delay.as_millis() as u64;
    let range = (millis as f64 * factor.min(1.0)) as u64;
    if range == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=range);
    Duration::from_millis(millis.saturating_sub(jitter))
}
