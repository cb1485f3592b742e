//! # Dependency Verification Gateway
//!
//! Answers "does this student / content exist?" for the grade service.
//!
//! ```text
//!  verify_exists(kind, id)
//!        │
//!        ├── cache hit (user:{id} / content:{id}) ──────────────► true
//!        │
//!        ▼
//!  breaker[kind.dependency_key()]
//!        │  open ────────────────────────────► fallback
//!        ▼
//!  retry ( fetch(id) )
//!        │  200 ──► cache record ─────────────────────────────► true
//!        │  404 ──► definitive, never retried ───────────────► false
//!        │  other ─► retried, then counted by the breaker ───► fallback
//!        ▼
//!  fallback: AssumeExists ──► true
//!            Propagate    ──► GatewayError::DependencyUnavailable
//! ```
//!
//! A 404 is mapped to a successful `None` inside the guarded operation, so it
//! is neither retried nor counted as a breaker failure. Cancellation records
//! nothing against the breaker, whether the guarded call is dropped or
//! returns [`RetryError::Cancelled`].

use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

use crate::client::{RemoteClient, SharedContentClient, SharedStudentClient};
use crate::error::{GatewayError, RemoteError};
use grade_domain::EntityKind;
use grade_persistence::{CacheKey, GradeCache};
use grade_resilience::{
    BreakerError, CancellationToken, CircuitBreakerRegistry, RetryError, RetryPolicy,
};

/// What to answer when a dependency cannot give a verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnavailablePolicy {
    /// Treat the entity as existing (availability over consistency)
    #[default]
    AssumeExists,
    /// Surface [`GatewayError::DependencyUnavailable`]
    Propagate,
}

enum Verdict<R> {
    Found(R),
    Missing,
    Assumed,
    Cancelled,
}

pub struct DependencyGateway {
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    cache: GradeCache,
    students: SharedStudentClient,
    contents: SharedContentClient,
}

impl DependencyGateway {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        cache: GradeCache,
        students: SharedStudentClient,
        contents: SharedContentClient,
    ) -> Self {
        Self {
            breakers,
            retry,
            cache,
            students,
            contents,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Whether the entity exists.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DependencyUnavailable`] only under
    /// [`UnavailablePolicy::Propagate`] when no verdict could be obtained.
    pub async fn verify_exists(
        &self,
        kind: EntityKind,
        id: &str,
        policy: UnavailablePolicy,
    ) -> Result<bool, GatewayError> {
        self.verify_exists_with_cancel(kind, id, policy, &CancellationToken::new())
            .await
    }

    /// [`Self::verify_exists`] that abandons retries once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`Self::verify_exists`], plus [`GatewayError::Cancelled`].
    pub async fn verify_exists_with_cancel(
        &self,
        kind: EntityKind,
        id: &str,
        policy: UnavailablePolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, GatewayError> {
        match kind {
            EntityKind::Student => {
                self.verify(
                    kind,
                    id,
                    CacheKey::User(id.to_string()),
                    self.students.as_ref(),
                    policy,
                    cancel,
                )
                .await
            }
            EntityKind::Content => {
                self.verify(
                    kind,
                    id,
                    CacheKey::Content(id.to_string()),
                    self.contents.as_ref(),
                    policy,
                    cancel,
                )
                .await
            }
        }
    }

    async fn verify<R>(
        &self,
        kind: EntityKind,
        id: &str,
        key: CacheKey,
        client: &dyn RemoteClient<Record = R>,
        policy: UnavailablePolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, GatewayError>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if self.cache.get::<R>(&key).await.is_some() {
            tracing::debug!(entity = %kind, id, "Existence served from cache");
            return Ok(true);
        }

        let dependency = kind.dependency_key();
        let lookup = || async move {
            self.retry
                .execute_with_cancel(dependency, cancel, || async move {
                    match client.fetch(id).await {
                        Ok(record) => Ok(Some(record)),
                        Err(RemoteError::NotFound { .. }) => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await
                .map(|found| found.map_or(Verdict::Missing, Verdict::Found))
        };

        let guarded = async {
            match policy {
                UnavailablePolicy::AssumeExists => Ok(self
                    .breakers
                    .execute_with_fallback_ignoring(
                        dependency,
                        lookup,
                        RetryError::is_cancelled,
                        |error| async move {
                            if is_cancellation(&error) {
                                Verdict::Cancelled
                            } else {
                                Verdict::Assumed
                            }
                        },
                    )
                    .await),
                UnavailablePolicy::Propagate => {
                    match self
                        .breakers
                        .execute_ignoring(dependency, lookup, RetryError::is_cancelled)
                        .await
                    {
                        Ok(verdict) => Ok(verdict),
                        Err(error) if is_cancellation(&error) => Ok(Verdict::Cancelled),
                        Err(error) => Err(GatewayError::DependencyUnavailable {
                            dependency: dependency.to_string(),
                            reason: error.to_string(),
                        }),
                    }
                }
            }
        };

        // A call dropped on cancellation leaves no outcome in the breaker
        let verdict = tokio::select! {
            biased;
            () = cancel.cancelled() => Verdict::Cancelled,
            verdict = guarded => verdict?,
        };

        match verdict {
            Verdict::Found(record) => {
                self.cache.set(&key, &record).await;
                Ok(true)
            }
            Verdict::Missing => {
                tracing::info!(entity = %kind, id, "Remote entity does not exist");
                Ok(false)
            }
            Verdict::Assumed => {
                tracing::warn!(entity = %kind, id, dependency, "Dependency degraded, assuming entity exists");
                Ok(true)
            }
            Verdict::Cancelled => Err(GatewayError::Cancelled {
                dependency: dependency.to_string(),
            }),
        }
    }
}

const fn is_cancellation(error: &BreakerError<RetryError<RemoteError>>) -> bool {
    matches!(error, BreakerError::Inner(inner) if inner.is_cancelled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grade_domain::{ContentRecord, StudentRecord};
    use grade_persistence::{CacheTtl, MemoryCache};
    use grade_resilience::{
        BreakerOptions, CircuitState, RecordingEventSink, ResilienceEvent, RetryConfig,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted responses; the last one repeats once the script runs out
    struct ScriptedClient<R> {
        script: Mutex<VecDeque<Result<R, RemoteError>>>,
        latency: Duration,
        calls: AtomicU32,
    }

    impl<R: Clone> ScriptedClient<R> {
        fn new(script: Vec<Result<R, RemoteError>>) -> Arc<Self> {
            Self::with_latency(script, Duration::ZERO)
        }

        fn with_latency(script: Vec<Result<R, RemoteError>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                latency,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<R> RemoteClient for ScriptedClient<R>
    where
        R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        type Record = R;

        async fn fetch(&self, _id: &str) -> Result<R, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn student() -> StudentRecord {
        StudentRecord {
            id: "s1".into(),
            nome: "Ana".into(),
            email: "ana@example.com".into(),
        }
    }

    fn content() -> ContentRecord {
        ContentRecord {
            id: "c1".into(),
            titulo: "Algebra".into(),
            curso: "Math".into(),
            descricao: None,
            unidade: None,
        }
    }

    fn unavailable() -> RemoteError {
        RemoteError::Unavailable("503 Service Unavailable".into())
    }

    struct Harness {
        gateway: DependencyGateway,
        students: Arc<ScriptedClient<StudentRecord>>,
        contents: Arc<ScriptedClient<ContentRecord>>,
        cache_backend: Arc<MemoryCache>,
        sink: Arc<RecordingEventSink>,
    }

    fn harness(
        students: Vec<Result<StudentRecord, RemoteError>>,
        contents: Vec<Result<ContentRecord, RemoteError>>,
    ) -> Harness {
        harness_with(
            ScriptedClient::new(students),
            ScriptedClient::new(contents),
            RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                ..RetryConfig::default()
            },
        )
    }

    fn harness_with(
        students: Arc<ScriptedClient<StudentRecord>>,
        contents: Arc<ScriptedClient<ContentRecord>>,
        retry: RetryConfig,
    ) -> Harness {
        let sink = Arc::new(RecordingEventSink::new());
        let cache_backend = Arc::new(MemoryCache::new());
        let gateway = DependencyGateway::new(
            Arc::new(CircuitBreakerRegistry::new(
                BreakerOptions::default(),
                sink.clone(),
            )),
            RetryPolicy::new(retry, sink.clone()),
            GradeCache::new(cache_backend.clone(), CacheTtl::default()),
            students.clone(),
            contents.clone(),
        );
        Harness {
            gateway,
            students,
            contents,
            cache_backend,
            sink,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_populates_cache() {
        let h = harness(vec![Ok(student())], vec![Ok(content())]);

        assert_eq!(
            h.gateway
                .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
                .await,
            Ok(true)
        );
        assert!(h.cache_backend.contains("user:s1"));

        // Served from cache the second time
        assert_eq!(
            h.gateway
                .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
                .await,
            Ok(true)
        );
        assert_eq!(h.students.calls(), 1);

        assert_eq!(
            h.gateway
                .verify_exists(EntityKind::Content, "c1", UnavailablePolicy::Propagate)
                .await,
            Ok(true)
        );
        assert!(h.cache_backend.contains("content:c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_definitive() {
        let h = harness(
            vec![Err(RemoteError::NotFound { id: "s9".into() })],
            vec![Ok(content())],
        );

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s9", UnavailablePolicy::AssumeExists)
            .await;

        assert_eq!(verdict, Ok(false));
        assert_eq!(h.students.calls(), 1);
        assert!(!h.cache_backend.contains("user:s9"));
        assert!(h.sink.retry_delays().is_empty());
        assert!(
            !h.sink
                .events()
                .iter()
                .any(|e| matches!(e, ResilienceEvent::FallbackInvoked { .. }))
        );
        let snapshot = h.gateway.breakers().breaker("login-service").snapshot();
        assert_eq!(snapshot.window.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let h = harness(vec![Err(unavailable()), Ok(student())], vec![Ok(content())]);

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
            .await;

        assert_eq!(verdict, Ok(true));
        assert_eq!(h.students.calls(), 2);
        assert_eq!(h.sink.retry_delays(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_fallback() {
        let h = harness(vec![Err(unavailable())], vec![Ok(content())]);

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
            .await;

        assert!(matches!(
            verdict,
            Err(GatewayError::DependencyUnavailable { ref dependency, .. }) if dependency == "login-service"
        ));
        assert_eq!(h.students.calls(), 3);
        assert!(!h.cache_backend.contains("user:s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_assumes_existence() {
        let h = harness(vec![Ok(student())], vec![Err(unavailable())]);

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Content, "c1", UnavailablePolicy::AssumeExists)
            .await;

        assert_eq!(verdict, Ok(true));
        assert_eq!(h.contents.calls(), 3);
        // An assumed entity is not cached
        assert!(!h.cache_backend.contains("content:c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_remote_call() {
        let h = harness(vec![Ok(student())], vec![Ok(content())]);
        h.gateway.breakers().breaker("login-service").force_open();

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::AssumeExists)
            .await;
        assert_eq!(verdict, Ok(true));
        assert_eq!(h.students.calls(), 0);

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
            .await;
        assert!(matches!(
            verdict,
            Err(GatewayError::DependencyUnavailable { .. })
        ));
        assert_eq!(
            h.gateway.breakers().breaker("login-service").state(),
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_lookup() {
        let h = harness(vec![Err(unavailable())], vec![Ok(content())]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let verdict = h
            .gateway
            .verify_exists_with_cancel(
                EntityKind::Student,
                "s1",
                UnavailablePolicy::AssumeExists,
                &cancel,
            )
            .await;

        assert_eq!(
            verdict,
            Err(GatewayError::Cancelled {
                dependency: "login-service".into()
            })
        );
        assert_eq!(h.students.calls(), 0);
        let snapshot = h.gateway.breakers().breaker("login-service").snapshot();
        assert_eq!(snapshot.window.failures, 0);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_retry_leaves_breaker_closed() {
        let h = Arc::new(harness(vec![Err(unavailable())], vec![Ok(content())]));
        let cancel = CancellationToken::new();

        let task = {
            let h = h.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                h.gateway
                    .verify_exists_with_cancel(
                        EntityKind::Student,
                        "s1",
                        UnavailablePolicy::Propagate,
                        &cancel,
                    )
                    .await
            })
        };

        // First attempt fails, the 10ms backoff is pending
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        assert!(matches!(
            task.await.unwrap(),
            Err(GatewayError::Cancelled { .. })
        ));
        assert_eq!(h.students.calls(), 1);
        let snapshot = h.gateway.breakers().breaker("login-service").snapshot();
        assert_eq!(snapshot.window.total(), 0);
    }

    /// With stock tuning the 3s breaker timeout covers the whole retry
    /// sequence; the 1s and 2s backoff waits leave no room for a third attempt.
    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_cuts_retry_sequence() {
        let h = harness_with(
            ScriptedClient::with_latency(vec![Err(unavailable())], Duration::from_millis(50)),
            ScriptedClient::new(vec![Ok(content())]),
            RetryConfig::default(),
        );

        let verdict = h
            .gateway
            .verify_exists(EntityKind::Student, "s1", UnavailablePolicy::Propagate)
            .await;

        match verdict {
            Err(GatewayError::DependencyUnavailable { dependency, reason }) => {
                assert_eq!(dependency, "login-service");
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(h.students.calls(), 2);
        assert_eq!(
            h.sink.retry_delays(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert!(
            h.sink
                .events()
                .iter()
                .any(|e| matches!(e, ResilienceEvent::BreakerTimeout { .. }))
        );
        assert_eq!(
            h.gateway.breakers().breaker("login-service").state(),
            CircuitState::Open
        );
    }

    /// Cancels the caller's token from inside the fetch, then fails
    struct CancellingClient {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl RemoteClient for CancellingClient {
        type Record = StudentRecord;

        async fn fetch(&self, _id: &str) -> Result<StudentRecord, RemoteError> {
            self.cancel.cancel();
            Err(unavailable())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returned_by_lookup_is_not_a_failure() {
        for policy in [UnavailablePolicy::Propagate, UnavailablePolicy::AssumeExists] {
            let cancel = CancellationToken::new();
            let registry = Arc::new(CircuitBreakerRegistry::new(
                BreakerOptions::default(),
                Arc::new(RecordingEventSink::new()),
            ));
            let gateway = DependencyGateway::new(
                registry.clone(),
                RetryPolicy::new(RetryConfig::default(), Arc::new(RecordingEventSink::new())),
                GradeCache::new(Arc::new(MemoryCache::new()), CacheTtl::default()),
                Arc::new(CancellingClient {
                    cancel: cancel.clone(),
                }),
                ScriptedClient::new(vec![Ok(content())]),
            );

            let verdict = gateway
                .verify_exists_with_cancel(EntityKind::Student, "s1", policy, &cancel)
                .await;

            assert!(matches!(verdict, Err(GatewayError::Cancelled { .. })));
            let snapshot = registry.breaker("login-service").snapshot();
            assert_eq!(snapshot.window.total(), 0);
            assert_eq!(snapshot.state, CircuitState::Closed);
        }
    }
}
