use std::time::Duration;

/// Delay after the n-th consecutive failed drain.
///
/// `delay = base * 2^(n - 1)`, capped at `max`.
///
/// | failures | delay (base=1s, max=60s) |
/// |----------|--------------------------|
/// | 0        | 0s                       |
/// | 1        | 1s                       |
/// | 2        | 2s                       |
/// | 3        | 4s                       |
/// | 7        | 60s (capped)             |
pub fn compute_backoff(consecutive_failures: u32, base: Duration, max: Duration) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let shift = consecutive_failures.saturating_sub(1);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    Duration::from_millis(delay_ms)
}
