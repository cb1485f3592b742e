//! Structured resilience events and the sinks that consume them.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitState;

/// Observable outcome of a retry or breaker decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResilienceEvent {
    /// An attempt failed and another one is scheduled after `delay`
    RetryScheduled {
        dependency: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The final attempt failed; no more retries
    RetryExhausted {
        dependency: String,
        attempts: u32,
        error: String,
    },
    /// A backoff wait was interrupted by cancellation
    RetryCancelled { dependency: String, attempts: u32 },
    BreakerTransition {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// Call refused without invoking the wrapped operation
    BreakerRejected { dependency: String },
    BreakerTimeout {
        dependency: String,
        timeout: Duration,
    },
    FallbackInvoked { dependency: String, reason: String },
}

/// Receiver for resilience events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResilienceEvent);
}

pub type SharedEventSink = Arc<dyn EventSink>;

/// Production sink: forwards every event to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ResilienceEvent) {
        match event {
            ResilienceEvent::RetryScheduled {
                dependency,
                attempt,
                delay,
                error,
            } => {
                tracing::warn!(
                    dependency = %dependency,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retry attempt failed, backing off"
                );
            }
            ResilienceEvent::RetryExhausted {
                dependency,
                attempts,
                error,
            } => {
                tracing::error!(
                    dependency = %dependency,
                    attempts,
                    error = %error,
                    "All retries failed"
                );
            }
            ResilienceEvent::RetryCancelled {
                dependency,
                attempts,
            } => {
                tracing::info!(dependency = %dependency, attempts, "Retry cancelled");
            }
            ResilienceEvent::BreakerTransition {
                dependency,
                from,
                to,
            } => match to {
                CircuitState::Open => {
                    tracing::warn!(dependency = %dependency, %from, "Circuit breaker opened");
                }
                CircuitState::HalfOpen => {
                    tracing::info!(dependency = %dependency, %from, "Circuit breaker half-open");
                }
                CircuitState::Closed => {
                    tracing::info!(dependency = %dependency, %from, "Circuit breaker closed");
                }
            },
            ResilienceEvent::BreakerRejected { dependency } => {
                tracing::debug!(dependency = %dependency, "Circuit breaker rejected call");
            }
            ResilienceEvent::BreakerTimeout {
                dependency,
                timeout,
            } => {
                tracing::warn!(
                    dependency = %dependency,
                    timeout_ms = timeout.as_millis() as u64,
                    "Guarded call timed out"
                );
            }
            ResilienceEvent::FallbackInvoked { dependency, reason } => {
                tracing::error!(dependency = %dependency, reason = %reason, "Circuit breaker fallback");
            }
        }
    }
}

/// Sink that keeps every event in memory, for assertions
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Delays of every scheduled retry, in order
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ResilienceEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Every state transition as `(from, to)`
    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ResilienceEvent::BreakerTransition { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ResilienceEvent) {
        self.events.lock().push(event);
    }
}
