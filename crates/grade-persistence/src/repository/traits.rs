//! # Repository Traits
//!
//! Abstract primary-store interface for grade records.
//! Implementations can be swapped for different backends (ScyllaDB, in-memory).

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use grade_domain::{Grade, GradeFilter, NewGrade};

// =============================================================================
// GRADE REPOSITORY
// =============================================================================

/// Source of truth for grade records
#[async_trait]
pub trait GradeRepository: Send + Sync {
    /// Grades matching `filter`; an unfiltered query returns every grade
    async fn find(&self, filter: &GradeFilter) -> Result<Vec<Grade>>;

    /// Get grade by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Grade>>;

    /// Get the grade recorded for a `(student, content)` pair
    async fn find_by_pair(&self, student_id: &str, content_id: &str) -> Result<Option<Grade>>;

    /// Persist a new grade, assigning its id and creation time.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::UniqueViolation`](crate::PersistenceError::UniqueViolation)
    /// if the pair already has a grade, even when the caller's own
    /// pre-check passed.
    async fn insert(&self, grade: NewGrade) -> Result<Grade>;

    /// Overwrite the mutable fields (`value`, `note`) of an existing grade.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::NotFound`](crate::PersistenceError::NotFound) if
    /// the grade is gone, never recreating it.
    async fn update(&self, grade: &Grade) -> Result<()>;

    /// Delete grade, returning whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

pub type SharedGradeRepository = Arc<dyn GradeRepository>;
