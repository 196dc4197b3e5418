use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Upper bound for a single redelivery delay.
const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Exponential redelivery schedule: attempt `k` (0-based) that fails with a
/// retryable error is redelivered after `base_delay * 2^k`, while
/// `k < max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Unjittered doubling backoff starting at `base_delay`. Exhaustion is
    /// decided by `max_retries`, not by elapsed time.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: MAX_DELAY,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay before redelivering a failed `attempt`, or `None` once retries
    /// are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let mut schedule = self.schedule();
        let mut delay = schedule.next_backoff();
        for _ in 0..attempt {
            delay = schedule.next_backoff();
        }
        delay.map(|d| d.min(MAX_DELAY))
    }
}
