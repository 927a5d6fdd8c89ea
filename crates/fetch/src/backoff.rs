//! Exponential backoff with symmetric jitter.
//!
//! For attempt `n` the unjittered delay is `min(max, base * 2^n)`. Jitter
//! scales that by a uniform factor in `[1 - j, 1 + j]`, and the result is
//! clamped back into `[0, max]`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use gleaner_core::RetryPolicy;

/// Unjittered delay for `attempt` (0-based).
pub fn unjittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    1u32.checked_shl(attempt)
        .and_then(|factor| policy.base_delay.checked_mul(factor))
        .map_or(policy.max_delay, |d| d.min(policy.max_delay))
}

/// Apply the policy's jitter to `delay` using `rng`.
pub fn jittered<R: Rng + ?Sized>(policy: &RetryPolicy, delay: Duration, rng: &mut R) -> Duration {
    if policy.jitter <= 0.0 || delay.is_zero() {
        return delay.min(policy.max_delay);
    }
    let factor = 1.0 + rng.gen_range(-policy.jitter..=policy.jitter);
    let secs = (delay.as_secs_f64() * factor).clamp(0.0, policy.max_delay.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Jittered delay for `attempt` (0-based).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    jittered(policy, unjittered_delay(policy, attempt), &mut rand::thread_rng())
}

/// Longest pause honoured for a single rate-limit signal.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Pause after a rate-limit signal: the source's retry-after when it sent
/// one, otherwise the backoff delay for `attempt`. Capped at
/// [`MAX_RATE_LIMIT_WAIT`].
pub fn rate_limit_wait(policy: &RetryPolicy, retry_after: Option<Duration>, attempt: u32) -> Duration {
    retry_after
        .unwrap_or_else(|| backoff_delay(policy, attempt))
        .min(MAX_RATE_LIMIT_WAIT)
}

/// `now + wait`, saturating at the latest representable instant.
pub fn time_after(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(wait)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
