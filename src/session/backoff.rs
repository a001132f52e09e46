//! Reconnect backoff policy

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff with symmetric jitter
///
/// Attempt `k` (1-based) waits `min(initial * multiplier^(k-1), max)` plus a
/// uniformly drawn offset in `[-jitter/2, +jitter/2]`, floored at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    /// Create a policy from configuration
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Attempts allowed before giving up
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Deterministic part of the delay for 1-based `attempt`
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.config.backoff_multiplier.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        let secs = (self.config.initial_delay.as_secs_f64() * factor).min(max);
        if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.config.max_delay
        }
    }

    /// Delay for `attempt` with a random jitter offset
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(-0.5..=0.5);
        self.jittered(attempt, unit)
    }

    /// Delay for `attempt` with jitter `unit` in `[-0.5, 0.5]`
    #[must_use]
    pub fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let offset = self.config.jitter.as_secs_f64() * unit.clamp(-0.5, 0.5);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::default())
    }

    #[test]
    fn base_delay_doubles() {
        let p = policy();
        assert_eq!(p.base_delay(1), Duration::from_secs(1));
        assert_eq!(p.base_delay(2), Duration::from_secs(2));
        assert_eq!(p.base_delay(3), Duration::from_secs(4));
        assert_eq!(p.base_delay(5), Duration::from_secs(16));
    }

    #[test]
    fn base_delay_capped_at_max() {
        let p = policy();
        assert_eq!(p.base_delay(6), Duration::from_secs(30));
        assert_eq!(p.base_delay(10), Duration::from_secs(30));
        assert_eq!(p.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_symmetric_and_bounded() {
        let p = policy();
        assert_eq!(p.jittered(1, -0.5), Duration::from_millis(750));
        assert_eq!(p.jittered(1, 0.5), Duration::from_millis(1250));
        assert_eq!(p.jittered(1, 7.0), Duration::from_millis(1250));
    }

    #[test]
    fn random_delay_within_jitter_of_base() {
        let p = policy();
        for attempt in 1..=10 {
            let base = p.base_delay(attempt);
            for _ in 0..20 {
                let d = p.delay_for_attempt(attempt);
                let low = base.saturating_sub(Duration::from_millis(250));
                let high = base + Duration::from_millis(250);
                assert!(d >= low && d <= high, "attempt {attempt}: {d:?} vs {base:?}");
            }
        }
    }

    #[test]
    fn jitter_never_goes_negative() {
        let p = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            jitter: Duration::from_secs(2),
            ..ReconnectConfig::default()
        });
        assert_eq!(p.jittered(1, -0.5), Duration::ZERO);
    }
}
