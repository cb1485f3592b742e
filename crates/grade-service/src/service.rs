//! # Grade Service
//!
//! Owns the grade lifecycle. Every mutation of a grade for student `S` and
//! content `C` drops these cache entries:
//!
//! ```text
//! grade:{id}
//! grades:student:S   average:student:S
//! grades:content:C   average:content:C
//! ```
//!
//! The `user:` / `content:` existence entries are left to their TTL.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{GradeError, Result};
use grade_domain::{
    CreateGradeInput, EntityKind, FilterScope, Grade, GradeAverage, GradeFilter, NewGrade,
    UpdateGradeInput,
};
use grade_integration::{DependencyGateway, UnavailablePolicy};
use grade_persistence::{CacheKey, GradeCache, PersistenceError, SharedGradeRepository};
use grade_resilience::CancellationToken;

pub struct GradeService {
    repository: SharedGradeRepository,
    cache: GradeCache,
    gateway: Arc<DependencyGateway>,
    unavailable_policy: UnavailablePolicy,
}

impl GradeService {
    /// Service that assumes existence when a dependency is degraded
    pub fn new(
        repository: SharedGradeRepository,
        cache: GradeCache,
        gateway: Arc<DependencyGateway>,
    ) -> Self {
        Self {
            repository,
            cache,
            gateway,
            unavailable_policy: UnavailablePolicy::AssumeExists,
        }
    }

    #[must_use]
    pub const fn with_unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_policy = policy;
        self
    }

    pub fn gateway(&self) -> &Arc<DependencyGateway> {
        &self.gateway
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Register a grade after verifying both references.
    ///
    /// # Errors
    ///
    /// [`GradeError::EntityNotFound`] for a missing student or content,
    /// [`GradeError::DuplicateGrade`] when the pair is already graded (from
    /// the pre-check or from the store's own constraint),
    /// [`GradeError::DependencyUnavailable`] only when the service is
    /// configured to propagate degraded dependencies.
    pub async fn create(&self, input: CreateGradeInput) -> Result<Grade> {
        self.create_with_cancel(input, &CancellationToken::new())
            .await
    }

    /// [`Self::create`] whose dependency checks stop retrying once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`Self::create`].
    pub async fn create_with_cancel(
        &self,
        input: CreateGradeInput,
        cancel: &CancellationToken,
    ) -> Result<Grade> {
        input.validate()?;

        self.ensure_exists(EntityKind::Student, &input.student_id, cancel)
            .await?;
        self.ensure_exists(EntityKind::Content, &input.content_id, cancel)
            .await?;

        if self
            .repository
            .find_by_pair(&input.student_id, &input.content_id)
            .await?
            .is_some()
        {
            return Err(GradeError::DuplicateGrade {
                student_id: input.student_id,
                content_id: input.content_id,
            });
        }

        // A concurrent create can slip past the pre-check; the store decides
        let grade = self.repository.insert(NewGrade::from(input)).await?;

        self.cache.invalidate_student_cache(&grade.student_id).await;
        self.cache.invalidate_content_cache(&grade.content_id).await;
        self.cache.set_grade(&grade).await;

        tracing::info!(
            grade_id = %grade.id,
            student_id = %grade.student_id,
            content_id = %grade.content_id,
            value = grade.value,
            "Grade created"
        );

        Ok(grade)
    }

    /// Change `value` and/or `note` of an existing grade.
    ///
    /// # Errors
    ///
    /// [`GradeError::GradeNotFound`] or [`GradeError::InvalidInput`].
    pub async fn update(&self, id: Uuid, input: UpdateGradeInput) -> Result<Grade> {
        input.validate()?;

        let mut grade = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(GradeError::GradeNotFound(id))?;
        grade.apply(&input);

        self.repository
            .update(&grade)
            .await
            .map_err(|e| match e {
                PersistenceError::NotFound { .. } => GradeError::GradeNotFound(id),
                other => other.into(),
            })?;
        self.invalidate_grade(&grade).await;

        tracing::info!(grade_id = %id, value = grade.value, "Grade updated");
        Ok(grade)
    }

    /// # Errors
    ///
    /// [`GradeError::GradeNotFound`] if no grade has this id.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let grade = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(GradeError::GradeNotFound(id))?;

        if !self.repository.delete(id).await? {
            return Err(GradeError::GradeNotFound(id));
        }
        self.invalidate_grade(&grade).await;

        tracing::info!(grade_id = %id, "Grade removed");
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Grades matching `filter`.
    ///
    /// Filtering by exactly one reference is served from the id-list cache
    /// plus per-grade entries; any miss falls back to the store and
    /// repopulates. Other filters go straight to the store.
    ///
    /// # Errors
    ///
    /// [`GradeError::Storage`] when the store query fails.
    pub async fn find_all(&self, filter: &GradeFilter) -> Result<Vec<Grade>> {
        let list_key = match filter.scope() {
            FilterScope::Student(id) => CacheKey::StudentGrades(id.to_string()),
            FilterScope::Content(id) => CacheKey::ContentGrades(id.to_string()),
            FilterScope::Both { .. } | FilterScope::Unfiltered => {
                return Ok(self.repository.find(filter).await?);
            }
        };

        if let Some(grades) = self.cached_list(&list_key).await {
            tracing::debug!(key = %list_key, count = grades.len(), "Grade list served from cache");
            return Ok(grades);
        }

        let grades = self.repository.find(filter).await?;
        if !grades.is_empty() {
            let ids: Vec<Uuid> = grades.iter().map(|g| g.id).collect();
            self.cache.set(&list_key, &ids).await;
            for grade in &grades {
                self.cache.set_grade(grade).await;
            }
        }
        Ok(grades)
    }

    /// # Errors
    ///
    /// [`GradeError::GradeNotFound`] if no grade has this id.
    pub async fn find_one(&self, id: Uuid) -> Result<Grade> {
        if let Some(grade) = self.cache.grade(id).await {
            return Ok(grade);
        }

        let grade = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(GradeError::GradeNotFound(id))?;
        self.cache.set_grade(&grade).await;
        Ok(grade)
    }

    /// Arithmetic mean of the grades matching `filter`.
    ///
    /// # Errors
    ///
    /// [`GradeError::InvalidInput`] when the filter names neither a student
    /// nor a content item.
    pub async fn calculate_average(&self, filter: &GradeFilter) -> Result<GradeAverage> {
        let key = match filter.scope() {
            FilterScope::Student(id) => Some(CacheKey::StudentAverage(id.to_string())),
            FilterScope::Content(id) => Some(CacheKey::ContentAverage(id.to_string())),
            FilterScope::Both { .. } => None,
            FilterScope::Unfiltered => {
                return Err(GradeError::InvalidInput(
                    "studentId or contentId is required".to_string(),
                ));
            }
        };

        if let Some(key) = &key {
            if let Some(average) = self.cache.average(key).await {
                return Ok(average);
            }
        }

        let grades = self.repository.find(filter).await?;
        let average = GradeAverage::compute(&grades, filter);

        if let Some(key) = &key {
            self.cache.set(key, &average).await;
        }
        Ok(average)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn ensure_exists(
        &self,
        kind: EntityKind,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let exists = self
            .gateway
            .verify_exists_with_cancel(kind, id, self.unavailable_policy, cancel)
            .await?;

        if exists {
            Ok(())
        } else {
            Err(GradeError::EntityNotFound {
                kind,
                id: id.to_string(),
            })
        }
    }

    /// `None` unless the list and every grade it names are cached
    async fn cached_list(&self, key: &CacheKey) -> Option<Vec<Grade>> {
        let ids = self.cache.grade_ids(key).await?;
        let mut grades = Vec::with_capacity(ids.len());
        for id in ids {
            grades.push(self.cache.grade(id).await?);
        }
        Some(grades)
    }

    async fn invalidate_grade(&self, grade: &Grade) {
        self.cache.invalidate(&CacheKey::Grade(grade.id)).await;
        self.cache.invalidate_student_cache(&grade.student_id).await;
        self.cache.invalidate_content_cache(&grade.content_id).await;
    }
}
