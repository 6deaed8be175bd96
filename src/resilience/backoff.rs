//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// `max`, minus up to 10% jitter so probes of many nodes spread out.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    let capped = base.saturating_mul(factor).min(max);

    let jitter_ceiling = capped / 10;
    if jitter_ceiling.is_zero() {
        return capped;
    }
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..jitter_ceiling);
    capped - jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1_000);
    const MAX: Duration = Duration::from_millis(60_000);

    #[test]
    fn test_backoff_grows_within_jitter() {
        let first = calculate_backoff(1, BASE, MAX);
        assert!(first <= BASE && first >= BASE.mul_f64(0.9));

        let third = calculate_backoff(3, BASE, MAX);
        assert!(third <= BASE * 4 && third >= (BASE * 4).mul_f64(0.9));
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        for attempt in [7, 10, 40, u32::MAX] {
            assert!(calculate_backoff(attempt, BASE, MAX) <= MAX);
        }
        assert_eq!(calculate_backoff(0, BASE, MAX), Duration::ZERO);
    }
}
