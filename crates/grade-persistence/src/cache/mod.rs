//! # Cache Module
//!
//! Best-effort cache-aside layer. Backends speak raw strings with a TTL;
//! [`GradeCache`] adds typed key classes, JSON encoding and error absorption.

pub mod backend;
pub mod grade_cache;
#[cfg(feature = "redis")]
pub mod redis_client;

pub use backend::{CacheBackend, DisabledCache, MemoryCache, SharedCacheBackend};
pub use grade_cache::{CacheKey, CacheTtl, GradeCache};
#[cfg(feature = "redis")]
pub use redis_client::{CacheConfig, RedisCache};
