//! Registry of circuit breakers keyed by dependency name.
//!
//! Breakers are created lazily on first use and live as long as the registry.
//! Tuning is explicit: a key either uses the registry defaults or options
//! supplied once through [`CircuitBreakerRegistry::register`]. Registering a
//! key again with different options is an error rather than a silent no-op.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;

use crate::circuit_breaker::{BreakerError, BreakerOptions, BreakerSnapshot, CircuitBreaker};
use crate::events::{ResilienceEvent, SharedEventSink};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Circuit breaker for {dependency} already exists with different options")]
    ConflictingOptions { dependency: String },
}

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerOptions,
    sink: SharedEventSink,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: BreakerOptions, sink: SharedEventSink) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            sink,
        }
    }

    /// Create the breaker for `dependency` with explicit options.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ConflictingOptions`] if the breaker already exists with
    /// other options. Re-registering identical options is accepted.
    pub fn register(
        &self,
        dependency: &str,
        options: BreakerOptions,
    ) -> Result<Arc<CircuitBreaker>, RegistryError> {
        match self.breakers.entry(dependency.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().options() == options {
                    Ok(existing.get().clone())
                } else {
                    Err(RegistryError::ConflictingOptions {
                        dependency: dependency.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                let breaker = Arc::new(CircuitBreaker::new(dependency, options, self.sink.clone()));
                slot.insert(breaker.clone());
                Ok(breaker)
            }
        }
    }

    /// Breaker for `dependency`, created with the defaults if absent
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    dependency,
                    self.defaults,
                    self.sink.clone(),
                ))
            })
            .clone()
    }

    /// Run `operation` through the breaker for `dependency`.
    ///
    /// # Errors
    ///
    /// Propagates the breaker's rejection, timeout or the operation's error.
    pub async fn execute<T, E, F, Fut>(
        &self,
        dependency: &str,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(dependency).call(operation).await
    }

    /// [`Self::execute`] where operation errors matching `ignore` are not
    /// recorded by the breaker. See [`CircuitBreaker::call_ignoring`].
    ///
    /// # Errors
    ///
    /// As [`Self::execute`].
    pub async fn execute_ignoring<T, E, F, Fut, I>(
        &self,
        dependency: &str,
        operation: F,
        ignore: I,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: Fn(&E) -> bool,
    {
        self.breaker(dependency)
            .call_ignoring(operation, ignore)
            .await
    }

    /// Run `operation` through the breaker; any rejection, timeout or
    /// operation error is absorbed by `fallback`.
    pub async fn execute_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        dependency: &str,
        operation: F,
        fallback: FB,
    ) -> T
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(BreakerError<E>) -> FbFut,
        FbFut: Future<Output = T>,
    {
        self.execute_with_fallback_ignoring(dependency, operation, |_| false, fallback)
            .await
    }

    /// [`Self::execute_with_fallback`] where operation errors matching
    /// `ignore` still reach `fallback` but are not recorded by the breaker.
    pub async fn execute_with_fallback_ignoring<T, E, F, Fut, I, FB, FbFut>(
        &self,
        dependency: &str,
        operation: F,
        ignore: I,
        fallback: FB,
    ) -> T
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: Fn(&E) -> bool,
        FB: FnOnce(BreakerError<E>) -> FbFut,
        FbFut: Future<Output = T>,
    {
        match self.execute_ignoring(dependency, operation, ignore).await {
            Ok(value) => value,
            Err(error) => {
                self.sink.emit(ResilienceEvent::FallbackInvoked {
                    dependency: dependency.to_string(),
                    reason: error.to_string(),
                });
                fallback(error).await
            }
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}
