// Retry strategies with exponential backoff and jitter.
// Used to bound in-process retries of outbound email delivery.

use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Calculate the delay before the next retry attempt.
    /// Returns None once the attempt budget is exhausted.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Maximum number of retries this strategy allows
    fn max_retries(&self) -> u32;

    /// Check if more retries are allowed
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }
}

/// Exponential backoff with jitter.
/// Delay doubles each attempt from the base, capped at the maximum; a small
/// random jitter spreads out simultaneous retries.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
            max_retries: 3,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_factor: f64,
        max_retries: u32,
    ) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_retries,
        }
    }

    /// Exponential delay without jitter, capped at the maximum
    fn calculate_base_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        delay.min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let mut rng = rand::thread_rng();
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rng.gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let base = self.calculate_base_delay_ms(attempt);
        Some(Duration::from_millis(self.add_jitter_ms(base)))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Fixed delay retry strategy (for testing or simple cases)
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(self.delay)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let strategy = ExponentialBackoff::with_config(1_000, 30_000, 0.0, 5);

        assert_eq!(strategy.calculate_base_delay_ms(0), 1_000);
        assert_eq!(strategy.calculate_base_delay_ms(1), 2_000);
        assert_eq!(strategy.calculate_base_delay_ms(2), 4_000);
        assert_eq!(strategy.calculate_base_delay_ms(3), 8_000);
        // Capped at the maximum
        assert_eq!(strategy.calculate_base_delay_ms(10), 30_000);
    }

    #[test]
    fn test_retry_limit_enforcement() {
        let strategy = ExponentialBackoff::with_config(1_000, 30_000, 0.0, 3);

        for attempt in 0..3 {
            assert!(
                strategy.next_delay(attempt).is_some(),
                "Should allow retry at attempt {}",
                attempt
            );
        }

        assert!(strategy.next_delay(3).is_none());
        assert!(strategy.next_delay(4).is_none());
    }

    #[test]
    fn test_jitter_adds_randomness() {
        let strategy = ExponentialBackoff::with_config(5_000, 30_000, 0.1, 3);

        let mut delays = Vec::new();
        for _ in 0..20 {
            delays.push(strategy.next_delay(0).unwrap().as_millis());
        }

        let first_delay = delays[0];
        let has_variation = delays.iter().any(|&d| d != first_delay);
        assert!(
            has_variation,
            "Expected some variation in delays due to jitter, but all {} samples were {}ms",
            delays.len(),
            first_delay
        );

        let base_ms = 5_000u128;
        let max_jitter_ms = (base_ms as f64 * 0.1) as u128;
        for delay in delays {
            assert!(
                delay >= base_ms && delay <= base_ms + max_jitter_ms,
                "Delay {}ms should be between {}ms and {}ms",
                delay,
                base_ms,
                base_ms + max_jitter_ms
            );
        }
    }

    #[test]
    fn test_should_retry() {
        let strategy = ExponentialBackoff::with_config(1_000, 30_000, 0.1, 3);

        assert!(strategy.should_retry(0));
        assert!(strategy.should_retry(2));
        assert!(!strategy.should_retry(3));
        assert!(!strategy.should_retry(4));
    }

    #[test]
    fn test_fixed_delay_strategy() {
        let delay = Duration::from_secs(10);
        let strategy = FixedDelay::new(delay, 2);

        assert_eq!(strategy.next_delay(0), Some(delay));
        assert_eq!(strategy.next_delay(1), Some(delay));
        assert_eq!(strategy.next_delay(2), None);
    }

    #[test]
    fn test_jitter_factor_clamping() {
        let strategy = ExponentialBackoff::with_config(1_000, 30_000, 1.5, 3);
        assert_eq!(strategy.jitter_factor, 1.0);

        let strategy = ExponentialBackoff::with_config(1_000, 30_000, -0.5, 3);
        assert_eq!(strategy.jitter_factor, 0.0);
    }
}
