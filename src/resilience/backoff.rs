//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based; attempt 0 yields no delay. The result never
/// exceeds `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped_delay + jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, 500, 8000), Duration::ZERO);

        let b1 = calculate_backoff(1, 500, 8000);
        assert!(b1.as_millis() >= 500);

        let b2 = calculate_backoff(2, 500, 8000);
        assert!(b2.as_millis() >= 1000);
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 5..40 {
            let delay = calculate_backoff(attempt, 500, 8000);
            assert!(delay.as_millis() <= 8000);
        }
        assert_eq!(calculate_backoff(30, 500, 8000).as_millis(), 8000);
    }
}
