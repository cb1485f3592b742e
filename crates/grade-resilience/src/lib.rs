//! # Grade Resilience
//!
//! Failure-handling primitives wrapped around every call to a remote
//! dependency (login service, content service).
//!
//! ## Composition
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CircuitBreakerRegistry::execute*               │
//! │        (one breaker per dependency key, lazy creation)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  one guarded call
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               RetryPolicy::execute_with_retry               │
//! │          (bounded exponential backoff, cancellable)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  1..=max_attempts
//!                              ▼
//!                       remote operation
//! ```
//!
//! Retry runs *inside* the breaker so the breaker sees one aggregate
//! success/failure per guarded call.
//!
//! Decision logic never logs directly: state changes, retries and rejections
//! are reported as [`ResilienceEvent`]s through an injected [`EventSink`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let sink: SharedEventSink = Arc::new(TracingEventSink);
//! let breakers = CircuitBreakerRegistry::new(BreakerOptions::default(), sink.clone());
//! let retry = RetryPolicy::new(RetryConfig::default(), sink);
//!
//! let exists = breakers
//!     .execute_with_fallback(
//!         "login-service",
//!         || retry.execute_with_retry("login-service", || client.ping()),
//!         |_| async { true },
//!     )
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod circuit_breaker;
pub mod events;
pub mod registry;
pub mod retry;
pub mod window;

pub use circuit_breaker::{
    Admission, BreakerCore, BreakerError, BreakerOptions, BreakerSnapshot, CircuitBreaker,
    CircuitState, Transition,
};
pub use events::{
    EventSink, RecordingEventSink, ResilienceEvent, SharedEventSink, TracingEventSink,
};
pub use registry::{CircuitBreakerRegistry, RegistryError};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
pub use window::{RollingWindow, WindowCounts};

pub use tokio_util::sync::CancellationToken;
