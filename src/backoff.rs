//! Jittered exponential backoff between retry attempts.

use rand::Rng;
use std::time::Duration;

/// Lower bound of the random factor applied to every delay.
const JITTER_FLOOR: f64 = 0.75;

/// Computes how long to wait before a retry attempt.
///
/// The delay for attempt `n` (1-indexed) is `min_delay * 2^(n-1)`, capped at
/// `max_delay`, scaled by a uniformly random factor in `[0.75, 1.0]` and then
/// floored at `min_delay`. The result therefore always lies within
/// `[min_delay, max_delay]`.
///
/// # Examples
///
/// ```
/// use catalog_client::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2));
///
/// let delay = policy.delay(3);
/// assert!(delay >= Duration::from_millis(300));
/// assert!(delay <= Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    /// Creates a policy bounded by `min_delay` and `max_delay`.
    ///
    /// Bounds given in the wrong order are swapped.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        if min_delay > max_delay {
            Self {
                min_delay: max_delay,
                max_delay: min_delay,
            }
        } else {
            Self {
                min_delay,
                max_delay,
            }
        }
    }

    /// A policy that never waits.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// The shortest delay this policy returns.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// The longest delay this policy returns.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the delay before the given attempt.
    ///
    /// Attempt numbers start at 1; `0` is treated as `1`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_FLOOR..=1.0);
        self.delay_with_factor(attempt, factor)
    }

    fn delay_with_factor(&self, attempt: usize, factor: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let multiplier = 1u32 << exponent;
        let base = self.min_delay.saturating_mul(multiplier).min(self.max_delay);
        let scaled = (base.as_nanos() as f64 * factor) as u64;
        Duration::from_nanos(scaled).max(self.min_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5))
    }
}
