//! Retry policy for module loads

use rand::Rng;
use std::time::Duration;

/// Attempts and backoff bounds for one module load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Exclusive upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based) with the given jitter
    ///
    /// `min(base * 2^(attempt-1) + jitter, max)`
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Uniform jitter in `[0, max_jitter)`
    pub fn sample_jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }

    /// Jittered delay after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay_for(attempt, self.sample_jitter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn test_default_backoff_windows() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let before_second = ms(policy.backoff(1));
            assert!((1000..2000).contains(&before_second), "got {before_second}");

            let before_third = ms(policy.backoff(2));
            assert!((2000..3000).contains(&before_third), "got {before_third}");
        }
    }

    #[test]
    fn test_delay_clamped_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(4, Duration::from_millis(500)), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(10, Duration::ZERO), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(u32::MAX, Duration::from_millis(999)), Duration::from_millis(8000));
    }

    #[test]
    fn test_exact_delays_without_jitter() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.sample_jitter(), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
    }
}
