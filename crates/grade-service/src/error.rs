//! Grade service error taxonomy

use thiserror::Error;
use uuid::Uuid;

use grade_domain::{DomainError, EntityKind};
use grade_integration::GatewayError;
use grade_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum GradeError {
    /// A referenced student or content item does not exist
    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("Dependency {dependency} unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("Grade already registered for student {student_id} and content {content_id}")]
    DuplicateGrade {
        student_id: String,
        content_id: String,
    },

    #[error("Grade {0} not found")]
    GradeNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(PersistenceError),
}

impl From<PersistenceError> for GradeError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::UniqueViolation {
                student_id,
                content_id,
            } => Self::DuplicateGrade {
                student_id,
                content_id,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<GatewayError> for GradeError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::DependencyUnavailable { dependency, reason } => {
                Self::DependencyUnavailable { dependency, reason }
            }
            GatewayError::Cancelled { dependency } => Self::DependencyUnavailable {
                dependency,
                reason: "verification cancelled".to_string(),
            },
        }
    }
}

impl From<DomainError> for GradeError {
    fn from(err: DomainError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
