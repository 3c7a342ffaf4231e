//! Bounded retry shared by every game call.

use std::future::Future;

use tracing::{error, warn};

use super::GameError;
use crate::config::DelayRange;

/// Retries a call a fixed number of times with a random pause in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: DelayRange,
}

impl RetryPolicy {
    /// Creates a policy making at most `max_attempts` attempts (at least one).
    #[must_use]
    pub fn new(max_attempts: u32, delay: DelayRange) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds or the attempts are used up.
    ///
    /// Returns `None` once every attempt failed or a non-retryable error
    /// came back; failures are logged here and never propagated.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GameError>>,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) if !e.is_retryable() => {
                    error!("{} failed: {}", what, e);
                    return None;
                }
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        what, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(self.delay.sample()).await;
                }
            }
        }

        error!("{} failed after {} attempts", what, self.max_attempts);
        None
    }
}
