//! Exponential backoff with jitter, shared by the DB client and the
//! webhook dispatcher's attempt loop.
//!
//! Narrowed from the teacher's `RetryStrategy` table (fixed-delay,
//! no-retry, custom-schedule variants) down to the one shape this crate
//! actually needs: exponential backoff capped at a maximum delay. A
//! generic strategy enum had no second caller here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::types::RetryPolicy;

/// Compute the delay before attempt number `attempt` (0-indexed: the
/// delay *after* the first failure), with up to 20% jitter applied so
/// concurrent retries don't synchronize.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.multiplier.powi(attempt as i32);
    let raw_ms = (policy.initial_delay_ms as f64 * exp).min(policy.max_delay_ms as f64);
    let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
    let jittered_ms = raw_ms * (1.0 - jitter_fraction);
    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

/// Run `op` up to `policy.max_retries + 1` times, sleeping with
/// [`backoff_delay`] between attempts, retrying only when `is_retryable`
/// returns true for the error. Returns the last error if the budget is
/// exhausted.
pub async fn with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    op_name: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !is_retryable(&err) {
                    warn!(op = op_name, attempt, error = %err, "retry budget exhausted or non-retryable error");
                    return Err(err);
                }
                let delay = backoff_delay(policy, attempt);
                debug!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
