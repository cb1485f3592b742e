//! # Retry Executor
//!
//! Bounded exponential backoff without jitter. Attempts are numbered from 1;
//! the wait after failed attempt `n` is
//! `min(max_delay, initial_delay * backoff_factor^(n-1))`. Waits suspend only
//! the calling task.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::events::{ResilienceEvent, SharedEventSink};

/// Retry tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait after the failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap_ms = self.max_delay.as_millis() as f64;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(delay_ms.min(cap_ms).max(0.0) as u64)
    }
}

/// Failure of a retried operation
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the error of the final attempt
    #[error("{dependency}: all {attempts} attempt(s) failed: {last_error}")]
    Exhausted {
        dependency: String,
        attempts: u32,
        last_error: E,
    },

    #[error("{dependency}: retry cancelled after {attempts} attempt(s)")]
    Cancelled { dependency: String, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Whether the caller gave up, as opposed to the dependency failing
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Retry executor bound to a configuration and an event sink
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sink: SharedEventSink,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, sink: SharedEventSink) -> Self {
        Self { config, sink }
    }

    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Same policy with a different attempt limit
    #[must_use]
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            config: RetryConfig {
                max_attempts,
                ..self.config
            },
            sink: self.sink.clone(),
        }
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// # Errors
    ///
    /// [`RetryError::Exhausted`] with the last observed error.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        dependency: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_cancel(dependency, &CancellationToken::new(), operation)
            .await
    }

    /// Like [`Self::execute_with_retry`], but stops as soon as `cancel` fires:
    /// no new attempt starts and a pending backoff wait is abandoned.
    ///
    /// # Errors
    ///
    /// [`RetryError::Exhausted`] with the last observed error, or
    /// [`RetryError::Cancelled`].
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        dependency: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(dependency, attempt - 1));
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= max_attempts {
                self.sink.emit(ResilienceEvent::RetryExhausted {
                    dependency: dependency.to_string(),
                    attempts: attempt,
                    error: error.to_string(),
                });
                return Err(RetryError::Exhausted {
                    dependency: dependency.to_string(),
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.config.delay_for(attempt);
            self.sink.emit(ResilienceEvent::RetryScheduled {
                dependency: dependency.to_string(),
                attempt,
                delay,
                error: error.to_string(),
            });

            tokio::select! {
                () = cancel.cancelled() => return Err(self.cancelled(dependency, attempt)),
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    fn cancelled<E>(&self, dependency: &str, attempts: u32) -> RetryError<E> {
        self.sink.emit(ResilienceEvent::RetryCancelled {
            dependency: dependency.to_string(),
            attempts,
        });
        RetryError::Cancelled {
            dependency: dependency.to_string(),
            attempts,
        }
    }
}
