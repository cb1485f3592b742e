//! Process-local grade store.
//!
//! Used by tests and by `STORE_BACKEND=memory`. The pair index is updated
//! under the same DashMap entry lock that decides uniqueness, so concurrent
//! inserts for one pair resolve to exactly one winner.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::traits::GradeRepository;
use crate::error::{PersistenceError, Result};
use grade_domain::{FilterScope, Grade, GradeFilter, NewGrade};

#[derive(Debug, Default)]
pub struct InMemoryGradeRepository {
    grades: DashMap<Uuid, Grade>,
    pairs: DashMap<(String, String), Uuid>,
}

impl InMemoryGradeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grades.is_empty()
    }
}

#[async_trait]
impl GradeRepository for InMemoryGradeRepository {
    async fn find(&self, filter: &GradeFilter) -> Result<Vec<Grade>> {
        if let FilterScope::Both { student_id, content_id } = filter.scope() {
            return Ok(self
                .find_by_pair(student_id, content_id)
                .await?
                .into_iter()
                .collect());
        }

        let mut grades: Vec<Grade> = self
            .grades
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        grades.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(grades)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Grade>> {
        Ok(self.grades.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_pair(&self, student_id: &str, content_id: &str) -> Result<Option<Grade>> {
        let key = (student_id.to_string(), content_id.to_string());
        let Some(id) = self.pairs.get(&key).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn insert(&self, grade: NewGrade) -> Result<Grade> {
        let key = (grade.student_id.clone(), grade.content_id.clone());
        match self.pairs.entry(key) {
            Entry::Occupied(_) => Err(PersistenceError::UniqueViolation {
                student_id: grade.student_id,
                content_id: grade.content_id,
            }),
            Entry::Vacant(slot) => {
                let stored = Grade {
                    id: Uuid::now_v7(),
                    student_id: grade.student_id,
                    content_id: grade.content_id,
                    value: grade.value,
                    note: grade.note,
                    created_at: Utc::now(),
                };
                self.grades.insert(stored.id, stored.clone());
                slot.insert(stored.id);
                Ok(stored)
            }
        }
    }

    async fn update(&self, grade: &Grade) -> Result<()> {
        let mut existing = self
            .grades
            .get_mut(&grade.id)
            .ok_or_else(|| PersistenceError::NotFound {
                entity_type: "grade".to_string(),
                key: grade.id.to_string(),
            })?;
        existing.value = grade.value;
        existing.note.clone_from(&grade.note);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let Some((_, removed)) = self.grades.remove(&id) else {
            return Ok(false);
        };
        self.pairs
            .remove_if(&(removed.student_id, removed.content_id), |_, owner| *owner == id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_grade(student: &str, content: &str, value: f64) -> NewGrade {
        NewGrade {
            student_id: student.to_string(),
            content_id: content.to_string(),
            value,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_identity() {
        let repo = InMemoryGradeRepository::new();
        let grade = repo.insert(new_grade("s1", "c1", 8.5)).await.unwrap();

        assert_eq!(grade.value, 8.5);
        assert_eq!(repo.find_by_id(grade.id).await.unwrap(), Some(grade.clone()));
        assert_eq!(repo.find_by_pair("s1", "c1").await.unwrap(), Some(grade));
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected() {
        let repo = InMemoryGradeRepository::new();
        repo.insert(new_grade("s1", "c1", 7.0)).await.unwrap();

        let err = repo.insert(new_grade("s1", "c1", 9.0)).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_single_winner() {
        let repo = Arc::new(InMemoryGradeRepository::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.insert(new_grade("s1", "c1", f64::from(i % 10))).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_filters() {
        let repo = InMemoryGradeRepository::new();
        repo.insert(new_grade("s1", "c1", 6.0)).await.unwrap();
        repo.insert(new_grade("s1", "c2", 8.0)).await.unwrap();
        repo.insert(new_grade("s2", "c1", 4.0)).await.unwrap();

        assert_eq!(repo.find(&GradeFilter::by_student("s1")).await.unwrap().len(), 2);
        assert_eq!(repo.find(&GradeFilter::by_content("c1")).await.unwrap().len(), 2);
        assert_eq!(repo.find(&GradeFilter::default()).await.unwrap().len(), 3);

        let both = GradeFilter {
            student_id: Some("s2".into()),
            content_id: Some("c1".into()),
        };
        let found = repo.find(&both).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 4.0);
    }

    #[tokio::test]
    async fn test_delete_frees_pair() {
        let repo = InMemoryGradeRepository::new();
        let grade = repo.insert(new_grade("s1", "c1", 5.0)).await.unwrap();

        assert!(repo.delete(grade.id).await.unwrap());
        assert!(!repo.delete(grade.id).await.unwrap());
        assert!(repo.insert(new_grade("s1", "c1", 6.0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_grade() {
        let repo = InMemoryGradeRepository::new();
        let mut grade = repo.insert(new_grade("s1", "c1", 5.0)).await.unwrap();
        grade.value = 9.0;
        grade.note = Some("revised".into());
        repo.update(&grade).await.unwrap();
        assert_eq!(repo.find_by_id(grade.id).await.unwrap(), Some(grade.clone()));

        repo.delete(grade.id).await.unwrap();
        assert!(matches!(
            repo.update(&grade).await,
            Err(PersistenceError::NotFound { .. })
        ));
    }
}
