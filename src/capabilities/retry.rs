use std::time::Duration;

use crate::errors::PipelineError;
use tokio_retry2::strategy::FixedInterval;

/// Errors a [`RetryPolicy`] is willing to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    RateLimited,
}

impl RetryOn {
    fn matches(&self, err: &PipelineError) -> bool {
        match self {
            RetryOn::RateLimited => err.is_rate_limited(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub retry_on: RetryOn,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retry_on: RetryOn::RateLimited,
        }
    }

    /// Delays between attempts: one fixed `backoff` per retry.
    pub fn strategy(&self) -> std::iter::Take<FixedInterval> {
        FixedInterval::new(self.backoff).take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// `attempt` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt: u32, err: &PipelineError) -> RetryDecision {
        if attempt < self.max_attempts && self.retry_on.matches(err) {
            RetryDecision::RetryAfter(self.backoff)
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Final error once the policy gave up. A rate limit that survived every
    /// attempt is reported as a transport failure.
    pub fn exhausted(&self, attempts: u32, err: PipelineError) -> PipelineError {
        match err {
            PipelineError::RateLimited => PipelineError::transport(format!(
                "still rate limited after {attempts} attempt(s)"
            )),
            other => other,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(10))
    }
}
