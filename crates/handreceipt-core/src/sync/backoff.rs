//! Retry delay schedule.

use std::time::Duration;

use crate::config::SyncConfig;

/// Delay before attempt `failed_attempts + 1`.
///
/// `base * multiplier^(failed_attempts - 1)`, capped at `max_delay_ms`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn retry_delay(config: &SyncConfig, failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
    let delay = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = delay.min(config.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Unix ms at which the next attempt becomes eligible.
pub fn next_attempt_at(config: &SyncConfig, failed_attempts: u32, now_ms: i64) -> i64 {
    let delay = i64::try_from(retry_delay(config, failed_attempts).as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(delay)
}
