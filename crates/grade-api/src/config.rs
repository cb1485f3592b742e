//! # API Configuration
//!
//! Environment-based configuration for the grade API service.
//! Unset keys take their defaults; malformed values are rejected.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use grade_integration::{HttpClientConfig, UnavailablePolicy};
use grade_persistence::{CacheConfig, CacheTtl, ScyllaConfig};
use grade_resilience::{BreakerOptions, RetryConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Which cache backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

impl FromStr for CacheBackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err(()),
        }
    }
}

/// Which primary store to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Scylla,
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scylla" => Ok(Self::Scylla),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub ttl: CacheTtl,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub server_addr: SocketAddr,

    /// Logging level
    pub log_level: String,

    /// CORS allowed origins
    pub cors_origins: Vec<String>,

    pub cache: CacheSettings,

    pub store: StoreBackendKind,

    /// ScyllaDB configuration
    pub scylla: ScyllaConfig,

    /// Login service (students)
    pub login_service: HttpClientConfig,

    /// Content service
    pub content_service: HttpClientConfig,

    pub breaker: BreakerOptions,

    pub retry: RetryConfig,

    /// Answer used when a dependency cannot confirm an entity
    pub unavailable_policy: UnavailablePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first malformed value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);

        let redis_url = match vars.get("REDIS_URL") {
            Some(url) => url,
            None => {
                CacheConfig::from_host_port(
                    &vars.string("REDIS_HOST", "127.0.0.1"),
                    vars.parse("REDIS_PORT", 6379)?,
                )
                .url
            }
        };

        let timeout = vars.millis("HTTP_TIMEOUT_MS", 5000)?;
        let max_redirects = vars.parse::<usize>("HTTP_MAX_REDIRECTS", 5)?;
        let remote = |base_url: String| HttpClientConfig {
            base_url,
            timeout,
            max_redirects,
        };

        // Bounds the whole retry sequence, not one attempt. With the default
        // retry tuning the 1s and 2s backoff waits use up the 3s, so the third
        // attempt never starts and the call ends as a breaker timeout.
        let breaker_timeout = vars.millis("BREAKER_TIMEOUT_MS", 3000)?;

        Ok(Self {
            server_addr: vars.parse("SERVER_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,

            log_level: vars.string("LOG_LEVEL", "info"),

            cors_origins: vars
                .string("CORS_ORIGINS", "*")
                .split(',')
                .map(|origin| origin.trim().to_string())
                .collect(),

            cache: CacheSettings {
                backend: vars.parse("CACHE_BACKEND", CacheBackendKind::Redis)?,
                redis_url,
                ttl: CacheTtl::default(),
            },

            store: vars.parse("STORE_BACKEND", StoreBackendKind::Scylla)?,

            scylla: ScyllaConfig {
                hosts: vars
                    .string("SCYLLA_HOSTS", "127.0.0.1:9042")
                    .split(',')
                    .map(|host| host.trim().to_string())
                    .collect(),
                keyspace: vars.string("SCYLLA_KEYSPACE", "grades"),
                username: vars.get("SCYLLA_USERNAME"),
                password: vars.get("SCYLLA_PASSWORD"),
                ..ScyllaConfig::default()
            },

            login_service: remote(vars.string("LOGIN_SERVICE_URL", "http://login-service:8080")),
            content_service: remote(vars.string(
                "CONTENT_SERVICE_URL",
                "http://conteudo-service:3000/conteudo",
            )),

            breaker: BreakerOptions {
                // Zero disables the per-call limit
                timeout: (!breaker_timeout.is_zero()).then_some(breaker_timeout),
                error_threshold_percentage: vars.parse("BREAKER_ERROR_THRESHOLD_PCT", 50)?,
                reset_timeout: vars.millis("BREAKER_RESET_TIMEOUT_MS", 10_000)?,
                rolling_window: vars.millis("BREAKER_ROLLING_WINDOW_MS", 60_000)?,
                rolling_buckets: vars.parse("BREAKER_ROLLING_BUCKETS", 10)?,
                volume_threshold: vars.parse("BREAKER_VOLUME_THRESHOLD", 0)?,
            },

            retry: RetryConfig {
                max_attempts: vars.parse("RETRY_MAX_ATTEMPTS", 3)?,
                initial_delay: vars.millis("RETRY_INITIAL_DELAY_MS", 1000)?,
                max_delay: vars.millis("RETRY_MAX_DELAY_MS", 10_000)?,
                backoff_factor: vars.parse("RETRY_BACKOFF_FACTOR", 2.0)?,
            },

            unavailable_policy: if vars.flag("ASSUME_EXISTS_ON_UNAVAILABLE", true)? {
                UnavailablePolicy::AssumeExists
            } else {
                UnavailablePolicy::Propagate
            },
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Trimmed, non-empty value
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            },
            None => Ok(default),
        }
    }
}
