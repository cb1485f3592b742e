//! # Grade Cache
//!
//! Typed cache-aside store over a [`CacheBackend`]. Every operation is best
//! effort: backend or decoding failures are logged and read as a miss, never
//! returned to the caller.
//!
//! Key classes:
//!
//! | Key                      | Value                | Default TTL |
//! |--------------------------|----------------------|-------------|
//! | `user:{id}`              | `StudentRecord`      | 1800s       |
//! | `content:{id}`           | `ContentRecord`      | 3600s       |
//! | `grade:{id}`             | `Grade`              | 900s        |
//! | `grades:student:{id}`    | grade ids            | 600s        |
//! | `grades:content:{id}`    | grade ids            | 600s        |
//! | `average:student:{id}`   | `GradeAverage`       | 900s        |
//! | `average:content:{id}`   | `GradeAverage`       | 900s        |
//!
//! Reads and invalidations are not transactional. A reader that misses,
//! queries the store and repopulates can race a concurrent mutation's
//! invalidation and leave a stale entry behind; that staleness is bounded by
//! the entry's TTL.

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::backend::SharedCacheBackend;
use grade_domain::{Grade, GradeAverage};

/// Cache TTL configuration per key class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub user: Duration,
    pub content: Duration,
    pub grade: Duration,
    pub grade_list: Duration,
    pub average: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            user: Duration::from_secs(1800),
            content: Duration::from_secs(3600),
            grade: Duration::from_secs(900),
            grade_list: Duration::from_secs(600),
            average: Duration::from_secs(900),
        }
    }
}

/// Semantic cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    User(String),
    Content(String),
    Grade(Uuid),
    StudentGrades(String),
    ContentGrades(String),
    StudentAverage(String),
    ContentAverage(String),
}

impl CacheKey {
    pub const fn ttl(&self, ttl: &CacheTtl) -> Duration {
        match self {
            Self::User(_) => ttl.user,
            Self::Content(_) => ttl.content,
            Self::Grade(_) => ttl.grade,
            Self::StudentGrades(_) | Self::ContentGrades(_) => ttl.grade_list,
            Self::StudentAverage(_) | Self::ContentAverage(_) => ttl.average,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Content(id) => write!(f, "content:{id}"),
            Self::Grade(id) => write!(f, "grade:{id}"),
            Self::StudentGrades(id) => write!(f, "grades:student:{id}"),
            Self::ContentGrades(id) => write!(f, "grades:content:{id}"),
            Self::StudentAverage(id) => write!(f, "average:student:{id}"),
            Self::ContentAverage(id) => write!(f, "average:content:{id}"),
        }
    }
}

/// Typed, error-absorbing cache facade
#[derive(Clone)]
pub struct GradeCache {
    backend: SharedCacheBackend,
    ttl: CacheTtl,
}

impl GradeCache {
    pub fn new(backend: SharedCacheBackend, ttl: CacheTtl) -> Self {
        Self { backend, ttl }
    }

    pub const fn ttl(&self) -> &CacheTtl {
        &self.ttl
    }

    // =========================================================================
    // GENERIC OPERATIONS
    // =========================================================================

    /// Read and decode `key`; any failure is a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();
        let raw = match self.backend.get(&rendered).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(key = %rendered, "Cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "Undecodable cache entry, evicting");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Store `value` under `key` with the key class TTL
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) {
        self.set_with_ttl(key, value, key.ttl(&self.ttl)).await;
    }

    pub async fn set_with_ttl<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let rendered = key.to_string();
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "Cache value not serializable");
                return;
            }
        };

        if let Err(e) = self.backend.set(&rendered, json, ttl).await {
            tracing::warn!(key = %rendered, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.invalidate_many(std::slice::from_ref(key)).await;
    }

    pub async fn invalidate_many(&self, keys: &[CacheKey]) {
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        if let Err(e) = self.backend.delete(&rendered).await {
            tracing::warn!(keys = ?rendered, error = %e, "Cache invalidation failed");
        }
    }

    // =========================================================================
    // COMPOUND INVALIDATION
    // =========================================================================

    /// Drop the grade list and average derived for a student. The `user:{id}`
    /// entry is left to its own TTL.
    pub async fn invalidate_student_cache(&self, student_id: &str) {
        self.invalidate_many(&[
            CacheKey::StudentGrades(student_id.to_string()),
            CacheKey::StudentAverage(student_id.to_string()),
        ])
        .await;
    }

    /// Drop the grade list and average derived for a content item
    pub async fn invalidate_content_cache(&self, content_id: &str) {
        self.invalidate_many(&[
            CacheKey::ContentGrades(content_id.to_string()),
            CacheKey::ContentAverage(content_id.to_string()),
        ])
        .await;
    }

    // =========================================================================
    // TYPED HELPERS
    // =========================================================================

    pub async fn grade(&self, id: Uuid) -> Option<Grade> {
        self.get(&CacheKey::Grade(id)).await
    }

    pub async fn set_grade(&self, grade: &Grade) {
        self.set(&CacheKey::Grade(grade.id), grade).await;
    }

    pub async fn grade_ids(&self, key: &CacheKey) -> Option<Vec<Uuid>> {
        self.get(key).await
    }

    pub async fn average(&self, key: &CacheKey) -> Option<GradeAverage> {
        self.get(key).await
    }
}
