//! Retry and timeout wrappers for async operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::core::backoff::RetryPolicy;
use crate::error::{AgentTimeout, RetryExhausted};

pub const DEFAULT_TIMEOUT_MESSAGE: &str = "operation timed out";

/// Failure of [`with_retry_if`].
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error(transparent)]
    Exhausted(RetryExhausted<E>),
    /// The predicate rejected the failure raised by attempt `attempts`.
    #[error("{cause}")]
    Permanent { attempts: u32, cause: E },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted(exhausted) => exhausted.attempts,
            RetryError::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn into_cause(self) -> E {
        match self {
            RetryError::Exhausted(exhausted) => exhausted.last_cause,
            RetryError::Permanent { cause, .. } => cause,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, backing off between failures.
///
/// `op` receives the 1-based attempt number.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_loop(policy, op, |_| true)
        .await
        .map_err(|stop| RetryExhausted {
            attempts: stop.attempts,
            last_cause: stop.cause,
        })
}

/// Like [`with_retry`], but only failures accepted by `retryable` are retried.
pub async fn with_retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    op: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    retry_loop(policy, op, retryable).await.map_err(|stop| {
        if stop.exhausted {
            RetryError::Exhausted(RetryExhausted {
                attempts: stop.attempts,
                last_cause: stop.cause,
            })
        } else {
            RetryError::Permanent {
                attempts: stop.attempts,
                cause: stop.cause,
            }
        }
    })
}

struct Stop<E> {
    attempts: u32,
    cause: E,
    exhausted: bool,
}

async fn retry_loop<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut op: F,
    retryable: P,
) -> Result<T, Stop<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !retryable(&err) => {
                debug!(attempt, error = %err, "failure is not retryable");
                return Err(Stop {
                    attempts: attempt,
                    cause: err,
                    exhausted: false,
                });
            }
            Err(err) if attempt >= max_attempts => {
                warn!(attempt, error = %err, "retry exhausted");
                return Err(Stop {
                    attempts: attempt,
                    cause: err,
                    exhausted: true,
                });
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Race `fut` against `deadline`.
///
/// On expiry the future is dropped; cooperative teardown is the caller's job.
pub async fn with_timeout<F>(
    fut: F,
    deadline: Duration,
    message: Option<&str>,
) -> Result<F::Output, AgentTimeout>
where
    F: Future,
{
    tokio::time::timeout(deadline, fut).await.map_err(|_| {
        let message = message.unwrap_or(DEFAULT_TIMEOUT_MESSAGE).to_string();
        warn!(deadline_ms = deadline.as_millis() as u64, %message, "deadline elapsed");
        AgentTimeout { deadline, message }
    })
}
