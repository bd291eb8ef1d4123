//! Delay schedule applied to an access token after too-many-requests
//! responses.

use std::time::Duration;

use rand::Rng;

/// Default first-level delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Default ceiling on the delay, whatever the level.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

// Floor on any produced delay, so a freshly limited token never becomes
// eligible within the same service pass.
const MIN_DELAY_MS: u64 = 10;
// Doubling stops here; 2^20 * base already exceeds any sane cap.
const MAX_SHIFT: u32 = 20;

/// Exponential, capped, jittered delay schedule indexed by backoff level.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Delay ceiling at level one.
    pub base: Duration,
    /// Upper bound on the delay at any level.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    /// Jittered delay for `level` (1-indexed; the first rate limit under a
    /// token is level one).
    ///
    /// The deterministic ceiling doubles per level up to `cap`; jitter
    /// draws from the upper half of the schedule so consecutive levels
    /// never shrink.
    pub fn delay_for(&self, level: u32, rng: &mut impl Rng) -> Duration {
        let exponent = level.saturating_sub(1).min(MAX_SHIFT);
        let ceiling = self.base.saturating_mul(1u32 << exponent).min(self.cap);

        let max_ms = (ceiling.as_millis().min(u128::from(u64::MAX)) as u64).max(MIN_DELAY_MS);
        let min_ms = (max_ms / 2).max(MIN_DELAY_MS);
        let delay_ms = if min_ms >= max_ms {
            max_ms
        } else {
            rng.gen_range(min_ms..=max_ms)
        };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;

    fn policy(base_ms: u64, cap_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
        }
    }

    #[rstest]
    #[case(1, 100, 200)]
    #[case(2, 200, 400)]
    #[case(3, 400, 800)]
    fn level_doubles_the_ceiling(#[case] level: u32, #[case] min_ms: u64, #[case] max_ms: u64) {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = policy(200, 60_000).delay_for(level, &mut rng);
        assert!(delay >= Duration::from_millis(min_ms / 2).max(Duration::from_millis(10)));
        assert!(delay <= Duration::from_millis(max_ms));
    }

    #[rstest]
    fn cap_bounds_every_level() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = policy(100, 1_500);
        for level in 1..64 {
            assert!(policy.delay_for(level, &mut rng) <= Duration::from_millis(1_500));
        }
    }

    #[rstest]
    fn delay_is_never_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = policy(0, 0).delay_for(1, &mut rng);
        assert!(delay >= Duration::from_millis(10));
    }

    proptest! {
        #[test]
        fn delay_stays_within_schedule(
            level in 1u32..40,
            base_ms in 1u64..5_000,
            cap_ms in 1u64..120_000,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = policy(base_ms, cap_ms).delay_for(level, &mut rng);
            let upper = cap_ms.max(10);
            prop_assert!(delay >= Duration::from_millis(10));
            prop_assert!(delay <= Duration::from_millis(upper));
        }
    }
}
