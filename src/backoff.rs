use std::time::Duration;

use rand::Rng;

use crate::RetryPolicy;

/// Exponential backoff with proportional jitter.
///
/// Attempt `1` waits about `base`, every following attempt doubles the
/// window, and the result never exceeds `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    /// `max` is raised to `base` when configured below it; `jitter` is
    /// clamped into `[0, 1]`.
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.base_delay, policy.max_delay, policy.jitter)
    }

    /// Un-jittered upper edge of the window for `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::rng())
    }

    /// Same as [`Backoff::next_delay`] with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }

        let high = ceiling.as_nanos().min(u64::MAX as u128) as u64;
        let low = (high as f64 * (1.0 - self.jitter)) as u64;
        let drawn = if low >= high {
            high
        } else {
            rng.random_range(low..=high)
        };

        let floor = ceiling.min(Duration::from_millis(1));
        Duration::from_nanos(drawn).max(floor)
    }
}
