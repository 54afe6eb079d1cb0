//! Fixed-schedule retry for the endpoint-resolution call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ResolveError;

/// How a single attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// HTTP 429; the scheduled delay is scaled by the attempt number.
    Throttled,
    /// Transport-level failure; wait the scheduled delay and try again.
    Transient(ResolveError),
    /// Anything else; stop immediately.
    Fatal(ResolveError),
}

impl AttemptError {
    fn into_error(self) -> ResolveError {
        match self {
            AttemptError::Throttled => ResolveError::Server { status: 429 },
            AttemptError::Transient(e) | AttemptError::Fatal(e) => e,
        }
    }
}

/// One attempt per scheduled delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_millis(3500),
            Duration::from_secs(7),
            Duration::from_secs(14),
        ])
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// An empty schedule still makes one attempt.
    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// Wait before the attempt following `attempt` (0-based).
    pub fn delay_after(&self, attempt: usize, error: &AttemptError) -> Duration {
        let base = self.delays.get(attempt).copied().unwrap_or(Duration::ZERO);
        match error {
            AttemptError::Throttled => base.saturating_mul(attempt as u32 + 1),
            _ => base,
        }
    }

    /// Drive `op` through the schedule, surfacing the last error when exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ResolveError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let attempts = self.attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(e) => e,
            };

            let wait = self.delay_after(attempt, &error);
            if attempt + 1 < attempts {
                warn!(attempt, ?wait, ?error, "attempt failed, backing off");
                tokio::time::sleep(wait).await;
            }
            last_error = Some(error.into_error());
        }

        Err(last_error.unwrap_or_else(|| ResolveError::Transport("no attempt made".into())))
    }
}
