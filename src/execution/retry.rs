use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff for gateway failures.
///
/// The handler never sleeps or re-submits on its own: scheduling only computes the delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Result of scheduling a retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    Scheduled { attempt: u32, delay_ms: u64 },
    Exhausted { attempts: u32 },
}

impl RetryDecision {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::Scheduled { delay_ms, .. } => Some(Duration::from_millis(*delay_ms)),
            RetryDecision::Exhausted { .. } => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryDecision::Exhausted { .. })
    }
}

impl RetryPolicy {
    /// initial_delay × backoff_factor^(retry_count - 1), for retry_count ≥ 1, capped at max_delay.
    /// Overflow and non-finite factors saturate to the cap.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what happens after a failure, given how many retries were already scheduled.
    pub fn schedule(&self, retries_so_far: u32) -> RetryDecision {
        if retries_so_far >= self.max_retries {
            return RetryDecision::Exhausted {
                attempts: retries_so_far,
            };
        }
        let attempt = retries_so_far + 1;
        RetryDecision::Scheduled {
            attempt,
            delay_ms: u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX),
        }
    }
}
