//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (transient kinds only)
//! - Execute retries with exponential backoff
//! - Stop as soon as the caller has cancelled
//!
//! # Design Decisions
//! - Terminal failures propagate after a single attempt
//! - Exhaustion carries the last underlying cause
//! - Every suspension point also waits on the caller's cancellation token

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::errors::{Classify, ErrorKind};

/// Outcome of a failed [`RetryExecutor::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// A non-retryable failure; returned after the attempt that produced it.
    #[error("non-retryable failure: {0}")]
    Terminal(E),
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// The caller cancelled before the operation succeeded.
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    /// The underlying failure, if one was observed.
    pub fn last(&self) -> Option<&E> {
        match self {
            RetryError::Terminal(e) => Some(e),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Terminal(e) => Some(e),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled { last, .. } => last,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryError::Terminal(_))
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            RetryError::Cancelled { .. } => ErrorKind::Cancelled,
            other => other.last().map_or(ErrorKind::Unknown, Classify::kind),
        }
    }

    fn detail(&self) -> String {
        match self {
            RetryError::Terminal(e) => e.detail(),
            RetryError::Exhausted { attempts, last } => {
                format!("gave up after {} attempts: {}", attempts, last.detail())
            }
            RetryError::Cancelled { attempts, .. } => {
                format!("cancelled after {} attempts", attempts)
            }
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op` until it succeeds, fails terminally, runs out of attempts,
    /// or `cancel` fires.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut last: Option<E> = None;
        let mut attempts = 0;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                tracing::info!(
                    operation,
                    attempt,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                metrics::record_retry(operation);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts, last }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts, last });
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts, last }),
                result = op() => result,
            };

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(operation, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    if !kind.is_retryable() {
                        tracing::warn!(operation, attempts, kind = %kind, error = %err, "Non-retryable failure");
                        return Err(RetryError::Terminal(err));
                    }
                    tracing::warn!(operation, attempts, kind = %kind, error = %err, "Retryable failure");
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => {
                tracing::error!(operation, attempts, error = %last, "Retries exhausted");
                Err(RetryError::Exhausted { attempts, last })
            }
            // Unreachable in practice: the loop runs at least once and only
            // falls through after recording a failure.
            None => Err(RetryError::Cancelled { attempts, last: None }),
        }
    }
}
