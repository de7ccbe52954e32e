//! Retry delay policy

use crate::config::NetworkConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with multiplicative jitter and a ceiling
///
/// `delay_for(n, s) = min(base * 2^(n-1) * (1 + jitter_fraction * s), max)`
/// for attempt `n >= 1` and jitter sample `s` in `[0, 1)`. With
/// `jitter_fraction <= 1` the delay never shrinks from one attempt to the
/// next, whatever samples are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_fraction: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter_fraction: f64) -> Self {
        Self {
            base,
            max,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.jitter_fraction,
        )
    }

    /// Delay before retrying after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let sample = jitter_sample.clamp(0.0, 1.0);

        let base_ms = self.base.as_secs_f64() * 1000.0;
        let raw_ms = base_ms * 2f64.powi(exponent) * (1.0 + self.jitter_fraction * sample);
        let max_ms = self.max.as_secs_f64() * 1000.0;

        Duration::from_secs_f64(raw_ms.min(max_ms) / 1000.0)
    }

    /// [`delay_for`](Self::delay_for) with a fresh random jitter sample
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen::<f64>();
        self.delay_for(attempt, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 0.5)
    }

    #[test]
    fn test_delay_without_jitter_doubles() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(5, 0.0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40, 0.99), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stretches_delay() {
        let policy = policy();
        let delay = policy.delay_for(1, 0.5);
        assert_eq!(delay, Duration::from_millis(1250));
    }

    #[test]
    fn test_delays_never_decrease_for_any_samples() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5), 1.0);
        let samples = [0.99, 0.0, 0.7, 0.0, 0.999, 0.1, 0.0, 0.5];

        // Worst case: high sample then low sample on the next attempt
        for attempt in 1..12 {
            let hi = policy.delay_for(attempt, samples[attempt as usize % samples.len()]);
            let next_lo = policy.delay_for(attempt + 1, 0.0);
            let worst_hi = policy.delay_for(attempt, 0.999_999);
            assert!(next_lo >= worst_hi || next_lo == policy.max);
            assert!(next_lo >= hi || next_lo == policy.max);
        }
    }

    #[test]
    fn test_random_delay_within_bounds() {
        let policy = policy();
        for _ in 0..100 {
            let delay = policy.jittered_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(3));
        }
    }
}
