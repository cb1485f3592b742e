//! # Circuit Breaker
//!
//! Three-state breaker guarding one dependency key:
//!
//! ```text
//! Closed ──(failure % >= threshold within window)──▶ Open
//! Open ──(reset_timeout elapsed, next call)──▶ HalfOpen (single probe)
//! HalfOpen ──(probe succeeds)──▶ Closed (window reset)
//! HalfOpen ──(probe fails)──▶ Open (timer restarts)
//! ```
//!
//! [`BreakerCore`] is the pure state machine. [`CircuitBreaker`] wraps it in a
//! mutex so admission and transitions are atomic for concurrent callers, and
//! parks callers that arrive while a half-open probe is in flight until the
//! probe settles.
//!
//! Every admitted call carries the breaker's generation. `force_open` and
//! `force_closed` start a new generation, and outcomes from an older one are
//! discarded, so a trial call that outlives an override cannot settle the
//! state on behalf of the next trial.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::events::{ResilienceEvent, SharedEventSink};
use crate::window::{RollingWindow, WindowCounts};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast, calls are rejected
    Open,
    /// One trial call decides the next state
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOptions {
    /// Per-call time limit; an elapsed call counts as a failure
    pub timeout: Option<Duration>,
    /// Failure percentage within the window that opens the breaker
    pub error_threshold_percentage: u32,
    /// Time spent open before a probe is allowed
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
    pub rolling_buckets: usize,
    /// Minimum calls within the window before the percentage is evaluated
    pub volume_threshold: u64,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(3000)),
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_millis(10_000),
            rolling_window: Duration::from_millis(60_000),
            rolling_buckets: 10,
            volume_threshold: 0,
        }
    }
}

/// Admission decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run the call; `probe` marks the single half-open trial
    Allowed { probe: bool },
    Rejected,
    /// A probe is in flight; wait for it to settle and ask again
    AwaitProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of a breaker, for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub window: WindowCounts,
}

/// Side-effect-free breaker state machine. Callers supply `now`.
#[derive(Debug, Clone)]
pub struct BreakerCore {
    options: BreakerOptions,
    state: CircuitState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    generation: u64,
}

impl BreakerCore {
    pub fn new(options: BreakerOptions, now: Instant) -> Self {
        Self {
            window: RollingWindow::new(options.rolling_window, options.rolling_buckets, now),
            options,
            state: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
            generation: 0,
        }
    }

    pub const fn state(&self) -> CircuitState {
        self.state
    }

    pub const fn options(&self) -> &BreakerOptions {
        &self.options
    }

    pub fn counts(&self, now: Instant) -> WindowCounts {
        self.window.counts(now)
    }

    /// Generation to hand back when settling a call admitted now
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn admit(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed { probe: false }, None),
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.options.reset_timeout);
                if cooled {
                    let transition = self.move_to(CircuitState::HalfOpen);
                    self.probe_in_flight = true;
                    (Admission::Allowed { probe: true }, Some(transition))
                } else {
                    (Admission::Rejected, None)
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    (Admission::AwaitProbe, None)
                } else {
                    self.probe_in_flight = true;
                    (Admission::Allowed { probe: true }, None)
                }
            }
        }
    }

    pub fn on_success(
        &mut self,
        now: Instant,
        probe: bool,
        generation: u64,
    ) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        if probe {
            self.probe_in_flight = false;
            if self.state == CircuitState::HalfOpen {
                self.window.reset();
                self.opened_at = None;
                return Some(self.move_to(CircuitState::Closed));
            }
        }
        if self.state == CircuitState::Closed {
            self.window.record_success(now);
        }
        None
    }

    pub fn on_failure(
        &mut self,
        now: Instant,
        probe: bool,
        generation: u64,
    ) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }
        if probe {
            self.probe_in_flight = false;
            if self.state == CircuitState::HalfOpen {
                return Some(self.trip(now));
            }
        }
        if self.state != CircuitState::Closed {
            return None;
        }

        self.window.record_failure(now);
        let counts = self.window.counts(now);
        let threshold = f64::from(self.options.error_threshold_percentage);
        if counts.total() >= self.options.volume_threshold
            && counts.failure_percentage() >= threshold
        {
            Some(self.trip(now))
        } else {
            None
        }
    }

    /// Release the probe slot of a trial call that never produced an outcome
    pub fn abandon_probe(&mut self, generation: u64) {
        if generation == self.generation {
            self.probe_in_flight = false;
        }
    }

    pub fn force_open(&mut self, now: Instant) -> Option<Transition> {
        if self.state == CircuitState::Open {
            return None;
        }
        self.next_generation();
        Some(self.trip(now))
    }

    pub fn force_closed(&mut self) -> Option<Transition> {
        if self.state == CircuitState::Closed {
            return None;
        }
        self.next_generation();
        self.window.reset();
        self.opened_at = None;
        Some(self.move_to(CircuitState::Closed))
    }

    /// Calls admitted before this point no longer settle anything
    fn next_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.probe_in_flight = false;
    }

    fn trip(&mut self, now: Instant) -> Transition {
        self.opened_at = Some(now);
        self.move_to(CircuitState::Open)
    }

    fn move_to(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}

/// Errors surfaced by a guarded call
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("Circuit breaker is open for {dependency}")]
    Open { dependency: String },

    #[error("Call to {dependency} timed out after {timeout:?}")]
    Timeout {
        dependency: String,
        timeout: Duration,
    },

    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the wrapped operation was never invoked
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Concurrency-safe breaker for one dependency key
pub struct CircuitBreaker {
    name: String,
    core: Mutex<BreakerCore>,
    probe_settled: Notify,
    sink: SharedEventSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("core", &*self.core.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: BreakerOptions, sink: SharedEventSink) -> Self {
        Self {
            name: name.into(),
            core: Mutex::new(BreakerCore::new(options, Instant::now())),
            probe_settled: Notify::new(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.core.lock().state()
    }

    pub fn options(&self) -> BreakerOptions {
        *self.core.lock().options()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.core.lock();
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: core.state(),
            window: core.counts(Instant::now()),
        }
    }

    /// Run `operation` if the breaker admits it, recording the outcome.
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] when rejected, [`BreakerError::Timeout`] when the
    /// call exceeds the configured timeout, [`BreakerError::Inner`] otherwise.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_ignoring(operation, |_| false).await
    }

    /// [`Self::call`] where an operation error matching `ignore` settles
    /// nothing: the window is untouched and a half-open trial slot is freed
    /// for the next caller.
    ///
    /// # Errors
    ///
    /// As [`Self::call`].
    pub async fn call_ignoring<T, E, F, Fut, I>(
        &self,
        operation: F,
        ignore: I,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: Fn(&E) -> bool,
    {
        let mut permit = self.acquire::<E>().await?;
        let timeout = self.options().timeout;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(BreakerError::Inner),
                Err(_) => {
                    self.sink.emit(ResilienceEvent::BreakerTimeout {
                        dependency: self.name.clone(),
                        timeout: limit,
                    });
                    Err(BreakerError::Timeout {
                        dependency: self.name.clone(),
                        timeout: limit,
                    })
                }
            },
            None => operation().await.map_err(BreakerError::Inner),
        };

        match &outcome {
            Err(BreakerError::Inner(error)) if ignore(error) => drop(permit),
            _ => permit.settle(outcome.is_ok()),
        }
        outcome
    }

    pub fn force_open(&self) {
        let transition = self.core.lock().force_open(Instant::now());
        self.publish(transition);
        self.probe_settled.notify_waiters();
    }

    pub fn force_closed(&self) {
        let transition = self.core.lock().force_closed();
        self.publish(transition);
        self.probe_settled.notify_waiters();
    }

    async fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        loop {
            // Register interest before reading state so a probe settling in
            // between cannot be missed.
            let settled = self.probe_settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let (admission, generation, transition) = {
                let mut core = self.core.lock();
                let (admission, transition) = core.admit(Instant::now());
                (admission, core.generation(), transition)
            };
            self.publish(transition);

            match admission {
                Admission::Allowed { probe } => {
                    return Ok(Permit {
                        breaker: self,
                        probe,
                        generation,
                        settled: false,
                    });
                }
                Admission::Rejected => {
                    self.sink.emit(ResilienceEvent::BreakerRejected {
                        dependency: self.name.clone(),
                    });
                    return Err(BreakerError::Open {
                        dependency: self.name.clone(),
                    });
                }
                Admission::AwaitProbe => settled.await,
            }
        }
    }

    fn publish(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            self.sink.emit(ResilienceEvent::BreakerTransition {
                dependency: self.name.clone(),
                from,
                to,
            });
        }
    }
}

/// Admission ticket; settles the outcome exactly once. A probe dropped
/// before settling (caller cancelled) frees the probe slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        let now = Instant::now();
        let transition = {
            let mut core = self.breaker.core.lock();
            if success {
                core.on_success(now, self.probe, self.generation)
            } else {
                core.on_failure(now, self.probe, self.generation)
            }
        };
        self.breaker.publish(transition);
        if self.probe {
            self.breaker.probe_settled.notify_waiters();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.core.lock().abandon_probe(self.generation);
            self.breaker.probe_settled.notify_waiters();
        }
    }
}
