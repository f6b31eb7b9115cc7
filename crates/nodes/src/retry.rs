//! Bounded retry with exponential back-off for external calls.
//!
//! Every attempt is wrapped in a timeout; a timeout counts as a retryable
//! failure. Cancellation is observed both while a call is in flight and while
//! sleeping between attempts; an abandoned call never reports an outcome.
//!
//! **Back-off:** `initial_backoff * 2^(attempt-1)`, capped at `max_backoff`, and
//! never shorter than a delay requested by the remote side.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use pipeline::{GenerationError, RetryPolicy, TrackerApiError};
use tokio_util::sync::CancellationToken;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetrySchedule {
    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// An error that can take part in retry decisions.
pub trait Retryable: Display {
    fn retry_policy(&self) -> RetryPolicy;

    /// The error to report when an attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for TrackerApiError {
    fn retry_policy(&self) -> RetryPolicy {
        TrackerApiError::retry_policy(self)
    }

    fn timed_out(after: Duration) -> Self {
        TrackerApiError::Timeout(after)
    }
}

impl Retryable for GenerationError {
    fn retry_policy(&self) -> RetryPolicy {
        GenerationError::retry_policy(self)
    }

    fn timed_out(after: Duration) -> Self {
        GenerationError::Timeout(after)
    }
}

/// A successful call and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a retried call produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The last error was not retryable, or the attempt budget ran out.
    GaveUp { error: E, attempts: u32 },
    /// The caller cancelled before a result arrived.
    Cancelled,
}

/// Runs `call` until it succeeds, fails permanently, exhausts `schedule`, or
/// `cancel` fires.
pub async fn retry<T, E, F, Fut>(
    operation: &str,
    schedule: &RetrySchedule,
    call_timeout: Duration,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<Retried<T>, RetryError<E>>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = schedule.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(call_timeout, call()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Ok(Err(error)) => error,
            Err(_) => E::timed_out(call_timeout),
        };

        let after = match error.retry_policy() {
            RetryPolicy::Retryable { after } => after,
            RetryPolicy::NonRetryable => {
                tracing::warn!(operation, attempt, error = %error, "Call failed permanently");
                return Err(RetryError::GaveUp {
                    error,
                    attempts: attempt,
                });
            }
        };

        if attempt >= max_attempts {
            tracing::error!(
                operation,
                attempt,
                error = %error,
                "Call failed: retry budget exhausted"
            );
            return Err(RetryError::GaveUp {
                error,
                attempts: attempt,
            });
        }

        let delay = schedule
            .delay_after(attempt)
            .max(after.unwrap_or_default());

        tracing::warn!(
            operation,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "Call failed, will retry after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
