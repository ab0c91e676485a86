//! Retry delays for failed saves.

use std::time::Duration;

/// How long to wait before each retry of a failed save.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Same delay before every retry
    Fixed(Duration),
    /// Delay grows by `factor` per attempt, capped at `max_delay`
    Exponential {
        initial_delay: Duration,
        factor: f64,
        max_delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::Fixed(delay) => *delay,
            RetryPolicy::Exponential {
                initial_delay,
                factor,
                max_delay,
            } => {
                let delay_secs =
                    initial_delay.as_secs_f64() * factor.powi(attempt.saturating_sub(1) as i32);
                Duration::from_secs_f64(delay_secs.min(max_delay.as_secs_f64()))
            }
        }
    }
}
