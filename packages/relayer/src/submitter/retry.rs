//! Bounded fixed-delay retry
//!
//! Used by the submitter for both broadcast and receipt polling: an operation
//! is retried while its outcome is retryable, up to `max_retries` attempts.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Fixed-delay retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_retries: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 30,
            delay: Duration::from_secs(1),
        }
    }
}

/// Result of a retried operation
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation completed (successfully or with a non-retryable error)
    Done(Result<T, E>),
    /// Every attempt ended in a retryable state; holds the last error, if any
    Exhausted { attempts: u32, last_error: Option<E> },
}

/// Result of a polled operation; errors never end polling early
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T, E> {
    Ready(T),
    /// No attempt produced a value; holds the last error, if any
    Exhausted { attempts: u32, last_error: Option<E> },
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run `operation` until it succeeds or fails with an error `retryable`
    /// rejects, sleeping `delay` between attempts.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut operation: F,
        retryable: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            match operation(attempt).await {
                Err(e) if retryable(&e) => {
                    debug!(
                        label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Retryable failure"
                    );
                    last_error = Some(e);
                }
                result => return RetryOutcome::Done(result),
            }
            if attempt < self.max_retries && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        RetryOutcome::Exhausted {
            attempts: self.max_retries,
            last_error,
        }
    }

    /// Poll `operation` until it yields `Some`, retrying on `None` and on
    /// any error. Errors from the final attempt are reported as exhaustion.
    pub async fn poll<T, E, F, Fut>(&self, label: &str, mut operation: F) -> PollOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            match operation(attempt).await {
                Ok(Some(value)) => return PollOutcome::Ready(value),
                Ok(None) => debug!(label, attempt, "Not yet available"),
                Err(e) => {
                    debug!(label, attempt, error = %e, "Poll failed");
                    last_error = Some(e);
                }
            }
            if attempt < self.max_retries && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        PollOutcome::Exhausted {
            attempts: self.max_retries,
            last_error,
        }
    }
}
