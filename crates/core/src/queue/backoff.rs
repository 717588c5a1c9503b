//! Retry delay computation.
//!
//! Every delay handed to the work queue goes through [`jitter`] so that
//! processes failing together do not retry together.

use crate::config::models::ManagerConfig;
use pv_protocol::RetryReason;
use rand::Rng;
use std::time::Duration;

/// Perturb `duration` uniformly within `duration * (1 ± fraction)`.
///
/// `fraction` is clamped to `[0, 1]`; zero returns the input unchanged.
pub fn jitter(duration: Duration, fraction: f64) -> Duration {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if fraction == 0.0 || duration.is_zero() {
        return duration;
    }

    let factor = rand::thread_rng().gen_range((1.0 - fraction)..=(1.0 + fraction));
    duration.mul_f64(factor)
}

/// `base * 2^(attempt - 1)`, capped at `ceiling`.
///
/// Attempt `0` is treated as the first attempt. Overflow saturates at the
/// ceiling.
pub fn exponential_backoff(attempt: u32, base: Duration, ceiling: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    1u32.checked_shl(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(ceiling, |delay| delay.min(ceiling))
}

/// Maps a requeue reason to the delay before the next worker turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    resync_interval: Duration,
    transient_retry_interval: Duration,
    backoff_base: Duration,
    backoff_ceiling: Duration,
    jitter_fraction: f64,
}

impl RetryPolicy {
    /// Delay for `reason`, jittered except for phase transitions.
    pub fn delay_for(&self, reason: RetryReason) -> Duration {
        let base = match reason {
            RetryReason::PhaseTransition => return Duration::ZERO,
            RetryReason::Resync => self.resync_interval,
            RetryReason::Transient => self.transient_retry_interval,
            RetryReason::Backoff { attempt } => {
                exponential_backoff(attempt, self.backoff_base, self.backoff_ceiling)
            }
        };
        jitter(base, self.jitter_fraction)
    }
}

impl From<&ManagerConfig> for RetryPolicy {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            resync_interval: config.resync_interval,
            transient_retry_interval: config.transient_retry_interval,
            backoff_base: config.backoff_base,
            backoff_ceiling: config.backoff_ceiling,
            jitter_fraction: config.jitter_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_backoff_doubles_then_caps() {
        let base = Duration::from_secs(5);
        let ceiling = Duration::from_secs(300);

        let delays: Vec<u64> = (1..=8)
            .map(|attempt| exponential_backoff(attempt, base, ceiling).as_secs())
            .collect();

        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(exponential_backoff(0, base, ceiling), base);
        assert_eq!(exponential_backoff(u32::MAX, base, ceiling), ceiling);
    }

    #[test]
    fn test_jitter_zero_fraction_is_identity() {
        let d = Duration::from_millis(1_234);
        assert_eq!(jitter(d, 0.0), d);
        assert_eq!(jitter(d, f64::NAN), d);
        assert_eq!(jitter(Duration::ZERO, 0.5), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_delays() {
        let config = ManagerConfig::default()
            .with_resync_interval(Duration::from_secs(30))
            .with_transient_retry_interval(Duration::from_secs(1))
            .with_backoff(Duration::from_secs(5), Duration::from_secs(60))
            .with_jitter_fraction(0.0);
        let policy = RetryPolicy::from(&config);

        assert_eq!(policy.delay_for(RetryReason::PhaseTransition), Duration::ZERO);
        assert_eq!(policy.delay_for(RetryReason::Resync), Duration::from_secs(30));
        assert_eq!(policy.delay_for(RetryReason::Transient), Duration::from_secs(1));
        assert_eq!(
            policy.delay_for(RetryReason::Backoff { attempt: 3 }),
            Duration::from_secs(20)
        );
        assert_eq!(
            policy.delay_for(RetryReason::Backoff { attempt: 10 }),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_phase_transition_is_never_jittered() {
        let policy = RetryPolicy::from(&ManagerConfig::default().with_jitter_fraction(1.0));
        for _ in 0..100 {
            assert_eq!(policy.delay_for(RetryReason::PhaseTransition), Duration::ZERO);
        }
    }

    proptest! {
        /// Property: jittered delays stay within the configured band.
        #[test]
        fn prop_jitter_stays_in_band(
            millis in 1u64..10_000_000,
            fraction in 0.0f64..=1.0,
        ) {
            let d = Duration::from_millis(millis);
            let jittered = jitter(d, fraction).as_secs_f64();
            let low = d.as_secs_f64() * (1.0 - fraction);
            let high = d.as_secs_f64() * (1.0 + fraction);

            // Allow for Duration's nanosecond rounding.
            prop_assert!(jittered >= low - 1e-6);
            prop_assert!(jittered <= high + 1e-6);
        }

        /// Property: backoff is non-decreasing in the attempt and never exceeds the ceiling.
        #[test]
        fn prop_backoff_monotone_and_capped(
            base_ms in 1u64..60_000,
            ceiling_factor in 1u64..100,
            attempt in 0u32..64,
        ) {
            let base = Duration::from_millis(base_ms);
            let ceiling = base * ceiling_factor as u32;

            let current = exponential_backoff(attempt, base, ceiling);
            let next = exponential_backoff(attempt + 1, base, ceiling);

            prop_assert!(current <= next);
            prop_assert!(next <= ceiling);
            prop_assert!(current >= base.min(ceiling));
        }
    }
}
