//! # API Context
//!
//! Application state and dependency wiring for the REST handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheBackendKind, Config, StoreBackendKind};
use crate::error::StartupError;
use grade_integration::{DependencyGateway, HttpContentClient, HttpStudentClient};
use grade_persistence::{
    CacheConfig, DisabledCache, GradeCache, InMemoryGradeRepository, MemoryCache, RedisCache,
    ScyllaClient, ScyllaGradeRepository, SharedCacheBackend, SharedGradeRepository,
};
use grade_resilience::{
    CircuitBreakerRegistry, BreakerSnapshot, RetryPolicy, SharedEventSink, TracingEventSink,
};
use grade_service::GradeService;

/// Upper bound on the initial Redis handshake
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Application context shared across all handlers
#[derive(Clone)]
pub struct ApiContext {
    pub service: Arc<GradeService>,
}

impl ApiContext {
    pub const fn new(service: Arc<GradeService>) -> Self {
        Self { service }
    }

    /// Wire store, cache, remote clients and resilience from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the primary store cannot be reached or a remote client cannot
    /// be built. An unreachable Redis only disables caching.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let sink: SharedEventSink = Arc::new(TracingEventSink);

        let repository = connect_store(config).await?;
        let cache = GradeCache::new(connect_cache(config).await, config.cache.ttl);

        let gateway = DependencyGateway::new(
            Arc::new(CircuitBreakerRegistry::new(config.breaker, sink.clone())),
            RetryPolicy::new(config.retry, sink),
            cache.clone(),
            Arc::new(HttpStudentClient::login_service(&config.login_service)?),
            Arc::new(HttpContentClient::content_service(&config.content_service)?),
        );

        let service = GradeService::new(repository, cache, Arc::new(gateway))
            .with_unavailable_policy(config.unavailable_policy);

        Ok(Self::new(Arc::new(service)))
    }

    /// Breaker state per dependency
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.service.gateway().breakers().snapshots()
    }
}

async fn connect_store(config: &Config) -> Result<SharedGradeRepository, StartupError> {
    match config.store {
        StoreBackendKind::Scylla => {
            tracing::info!(
                hosts = ?config.scylla.hosts,
                keyspace = %config.scylla.keyspace,
                "Connecting to ScyllaDB"
            );
            let client = Arc::new(ScyllaClient::new(config.scylla.clone()).await?);
            let repository = ScyllaGradeRepository::new(client);
            repository.ensure_schema().await?;
            tracing::info!("ScyllaDB connected");
            Ok(Arc::new(repository))
        }
        StoreBackendKind::Memory => {
            tracing::warn!("Using in-memory grade store; data is lost on restart");
            Ok(Arc::new(InMemoryGradeRepository::new()))
        }
    }
}

async fn connect_cache(config: &Config) -> SharedCacheBackend {
    match config.cache.backend {
        CacheBackendKind::Redis => {
            tracing::info!(url = %config.cache.redis_url, "Connecting to Redis");
            let redis_config = CacheConfig {
                url: config.cache.redis_url.clone(),
            };

            match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, RedisCache::connect(&redis_config))
                .await
            {
                Ok(Ok(cache)) => {
                    tracing::info!("Redis connected");
                    Arc::new(cache)
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Redis unavailable, caching disabled");
                    Arc::new(DisabledCache)
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?REDIS_CONNECT_TIMEOUT,
                        "Redis connection timed out, caching disabled"
                    );
                    Arc::new(DisabledCache)
                }
            }
        }
        CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
        CacheBackendKind::Disabled => Arc::new(DisabledCache),
    }
}
