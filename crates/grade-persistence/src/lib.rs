//! # Grade Persistence Library
//!
//! Primary store and cache-aside layer for grade records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Grade Service                            │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │       GradeCache        │   │      GradeRepository         │
//! │ (typed keys, TTLs,      │   │  (uniqueness per student/    │
//! │  errors read as misses) │   │   content pair)              │
//! └─────────────────────────┘   └──────────────────────────────┘
//!            │                         │
//!            ▼                         ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │  Redis | Memory | Off   │   │     ScyllaDB | Memory        │
//! │   (non-authoritative)   │   │     (Source of Truth)        │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - `scylla`: Enable ScyllaDB backend (default)
//! - `redis`: Enable Redis cache backend (default)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grade_persistence::{
//!     CacheConfig, CacheTtl, GradeCache, RedisCache,
//!     ScyllaClient, ScyllaConfig, ScyllaGradeRepository,
//! };
//!
//! let scylla = Arc::new(ScyllaClient::new(ScyllaConfig::default()).await?);
//! let repository = ScyllaGradeRepository::new(scylla);
//! repository.ensure_schema().await?;
//!
//! let redis = RedisCache::connect(&CacheConfig::default()).await?;
//! let cache = GradeCache::new(Arc::new(redis), CacheTtl::default());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod repository;

// Re-export commonly used types
pub use cache::{
    CacheBackend, CacheKey, CacheTtl, DisabledCache, GradeCache, MemoryCache,
    SharedCacheBackend,
};
#[cfg(feature = "redis")]
pub use cache::{CacheConfig, RedisCache};
pub use error::{PersistenceError, Result};
pub use repository::{GradeRepository, InMemoryGradeRepository, SharedGradeRepository};
#[cfg(feature = "scylla")]
pub use repository::{ScyllaClient, ScyllaConfig, ScyllaGradeRepository};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
