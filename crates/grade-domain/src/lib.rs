//! # Grade Registry - Domain Model
//!
//! Core domain entities, value objects, and enums for the grade registry.
//! A grade ties a student (owned by the login service) to a piece of content
//! (owned by the content service). These types are shared by persistence,
//! integration, service and API layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lowest accepted grade value
pub const MIN_GRADE_VALUE: f64 = 0.0;

/// Highest accepted grade value
pub const MAX_GRADE_VALUE: f64 = 10.0;

// =============================================================================
// ENUMS
// =============================================================================

/// Externally-owned entity kinds a grade references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Student,
    Content,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Content => "content",
        }
    }

    /// Dependency key guarding the remote service that owns this kind
    pub fn dependency_key(&self) -> &'static str {
        match self {
            Self::Student => "login-service",
            Self::Content => "content-service",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// GRADE AGGREGATE
// =============================================================================

/// Grade record (aggregate root)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: Uuid,
    pub student_id: String,
    pub content_id: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Grade {
    /// Apply a partial update. `created_at` and the referenced ids never change.
    pub fn apply(&mut self, update: &UpdateGradeInput) {
        if let Some(value) = update.value {
            self.value = value;
        }
        if let Some(note) = &update.note {
            self.note = Some(note.clone());
        }
    }
}

/// Grade about to be inserted; the primary store assigns `id` and `created_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGrade {
    pub student_id: String,
    pub content_id: String,
    pub value: f64,
    #[serde(default)]
    pub note: Option<String>,
}

impl From<CreateGradeInput> for NewGrade {
    fn from(input: CreateGradeInput) -> Self {
        Self {
            student_id: input.student_id,
            content_id: input.content_id,
            value: input.value,
            note: input.note,
        }
    }
}

// =============================================================================
// INPUTS
// =============================================================================

/// Input for registering a grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGradeInput {
    pub student_id: String,
    pub content_id: String,
    pub value: f64,
    #[serde(default)]
    pub note: Option<String>,
}

impl CreateGradeInput {
    /// Validate ids and value range.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::MissingReference`] for a blank id and
    /// [`DomainError::ValueOutOfRange`] when the value is outside `[0, 10]`.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.student_id.trim().is_empty() {
            return Err(DomainError::MissingReference(EntityKind::Student));
        }
        if self.content_id.trim().is_empty() {
            return Err(DomainError::MissingReference(EntityKind::Content));
        }
        validate_value(self.value)
    }
}

/// Partial update of a grade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGradeInput {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl UpdateGradeInput {
    /// # Errors
    ///
    /// Returns [`DomainError::ValueOutOfRange`] when a supplied value is outside `[0, 10]`.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self.value {
            Some(value) => validate_value(value),
            None => Ok(()),
        }
    }
}

fn validate_value(value: f64) -> Result<(), DomainError> {
    if value.is_finite() && (MIN_GRADE_VALUE..=MAX_GRADE_VALUE).contains(&value) {
        Ok(())
    } else {
        Err(DomainError::ValueOutOfRange(value))
    }
}

// =============================================================================
// QUERY/FILTER TYPES
// =============================================================================

/// Grade filter; both fields optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFilter {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
}

/// Which single reference a filter narrows on, if exactly one is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope<'a> {
    Student(&'a str),
    Content(&'a str),
    Both { student_id: &'a str, content_id: &'a str },
    Unfiltered,
}

impl GradeFilter {
    pub fn by_student(student_id: impl Into<String>) -> Self {
        Self {
            student_id: Some(student_id.into()),
            content_id: None,
        }
    }

    pub fn by_content(content_id: impl Into<String>) -> Self {
        Self {
            student_id: None,
            content_id: Some(content_id.into()),
        }
    }

    #[must_use]
    pub fn scope(&self) -> FilterScope<'_> {
        let student = self.student_id.as_deref().filter(|s| !s.is_empty());
        let content = self.content_id.as_deref().filter(|s| !s.is_empty());
        match (student, content) {
            (Some(s), None) => FilterScope::Student(s),
            (None, Some(c)) => FilterScope::Content(c),
            (Some(student_id), Some(content_id)) => FilterScope::Both {
                student_id,
                content_id,
            },
            (None, None) => FilterScope::Unfiltered,
        }
    }

    /// Whether a grade satisfies this filter
    #[must_use]
    pub fn matches(&self, grade: &Grade) -> bool {
        match self.scope() {
            FilterScope::Student(s) => grade.student_id == s,
            FilterScope::Content(c) => grade.content_id == c,
            FilterScope::Both {
                student_id,
                content_id,
            } => grade.student_id == student_id && grade.content_id == content_id,
            FilterScope::Unfiltered => true,
        }
    }
}

// =============================================================================
// DERIVED VALUES
// =============================================================================

/// Arithmetic mean over a set of grades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeAverage {
    pub media: f64,
    pub total_notas: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl GradeAverage {
    /// Compute the mean of `grades`; an empty set averages to zero.
    #[must_use]
    pub fn compute(grades: &[Grade], filter: &GradeFilter) -> Self {
        let total = grades.len();
        let media = if total > 0 {
            grades.iter().map(|g| g.value).sum::<f64>() / total as f64
        } else {
            0.0
        };

        let (student_id, content_id) = match filter.scope() {
            FilterScope::Student(s) => (Some(s), None),
            FilterScope::Content(c) => (None, Some(c)),
            FilterScope::Both {
                student_id,
                content_id,
            } => (Some(student_id), Some(content_id)),
            FilterScope::Unfiltered => (None, None),
        };

        Self {
            media,
            total_notas: total as u64,
            student_id: student_id.map(str::to_string),
            content_id: content_id.map(str::to_string),
        }
    }
}

// =============================================================================
// REMOTE ENTITY RECORDS
// =============================================================================

/// Student as returned by the login service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    #[serde(default)]
    pub nome: String,
    #[serde(default)]
    pub email: String,
}

/// Content as returned by the content service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    #[serde(default)]
    pub titulo: String,
    #[serde(default)]
    pub curso: String,
    #[serde(default)]
    pub descricao: Option<String>,
    #[serde(default)]
    pub unidade: Option<String>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("Missing {0} reference")]
    MissingReference(EntityKind),

    #[error("Grade value {0} outside [0, 10]")]
    ValueOutOfRange(f64),
}
