//! ScyllaDB repository implementation.
//!
//! ```text
//! grades       (id PK)                     student_id / content_id indexed
//! grade_pairs  ((student_id, content_id))  -> grade_id, written with IF NOT EXISTS
//! ```
//!
//! `grade_pairs` is the uniqueness arbiter: an insert claims the pair with a
//! lightweight transaction before the grade row is written. Both tables are
//! only written through lightweight transactions.
//!
//! A claim can outlive its grade when a write fails halfway (grade insert
//! failed and so did the release, or the row was deleted but the release
//! failed). Such a claim is taken over by the next insert for the pair once
//! it is older than `STALE_CLAIM_AFTER_MS` and its grade row is absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::serialize::row::SerializeRow;
use scylla::transport::query_result::QueryResult;
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use uuid::Uuid;

use super::traits::GradeRepository;
use crate::error::{PersistenceError, Result};
use grade_domain::{FilterScope, Grade, GradeFilter, NewGrade};

// =============================================================================
// SCYLLA CONFIGURATION
// =============================================================================

/// ScyllaDB connection configuration.
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub replication_factor: u8,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost:9042".to_string()],
            keyspace: "grades".to_string(),
            username: None,
            password: None,
            replication_factor: 1,
        }
    }
}

// =============================================================================
// SCYLLA CLIENT
// =============================================================================

/// ScyllaDB client wrapper.
pub struct ScyllaClient {
    session: Arc<Session>,
    pub config: ScyllaConfig,
}

impl ScyllaClient {
    /// Connect, creating the keyspace if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if no node is reachable or the keyspace cannot be used.
    pub async fn new(config: ScyllaConfig) -> Result<Self> {
        let mut builder = SessionBuilder::new().known_nodes(&config.hosts);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.user(user, pass);
        }

        let session = builder.build().await?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                    config.keyspace, config.replication_factor
                ),
                (),
            )
            .await?;
        session
            .query_unpaged(format!("USE {}", config.keyspace), ())
            .await?;

        tracing::info!(keyspace = %config.keyspace, hosts = ?config.hosts, "Connected to ScyllaDB");

        Ok(Self {
            session: Arc::new(session),
            config,
        })
    }

    /// Get session reference.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

// =============================================================================
// GRADE REPOSITORY
// =============================================================================

const GRADE_COLUMNS: &str = "id, student_id, content_id, value, note, created_at";

type GradeRow = (Uuid, String, String, f64, Option<String>, i64);

fn grade_from_row((id, student_id, content_id, value, note, created_at): GradeRow) -> Grade {
    Grade {
        id,
        student_id,
        content_id,
        value,
        note,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
    }
}

/// Age after which a pair claim without a grade row may be taken over
const STALE_CLAIM_AFTER_MS: i64 = 60_000;

/// `[applied]` is the first column of every lightweight transaction result
fn applied_flag(row: &Row) -> bool {
    row.columns
        .first()
        .and_then(Option::as_ref)
        .and_then(CqlValue::as_boolean)
        .unwrap_or(false)
}

fn applied(result: QueryResult) -> Result<bool> {
    let row = result
        .into_rows_result()
        .map_err(PersistenceError::scylla)?
        .first_row::<Row>()
        .map_err(PersistenceError::scylla)?;
    Ok(applied_flag(&row))
}

/// Grade ids are v7, so a claim carries the time it was made
fn claim_is_stale(holder: Uuid, now: DateTime<Utc>) -> bool {
    let claimed_ms = holder.get_timestamp().and_then(|ts| {
        let (secs, nanos) = ts.to_unix();
        i64::try_from(secs)
            .ok()
            .map(|secs| secs * 1000 + i64::from(nanos / 1_000_000))
    });
    claimed_ms.is_none_or(|ms| now.timestamp_millis() - ms >= STALE_CLAIM_AFTER_MS)
}

/// Grade repository backed by ScyllaDB.
pub struct ScyllaGradeRepository {
    client: Arc<ScyllaClient>,
}

impl ScyllaGradeRepository {
    pub const fn new(client: Arc<ScyllaClient>) -> Self {
        Self { client }
    }

    /// Create tables and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS grades (
                id uuid PRIMARY KEY,
                student_id text,
                content_id text,
                value double,
                note text,
                created_at bigint
            )",
            "CREATE INDEX IF NOT EXISTS grades_by_student ON grades (student_id)",
            "CREATE INDEX IF NOT EXISTS grades_by_content ON grades (content_id)",
            "CREATE TABLE IF NOT EXISTS grade_pairs (
                student_id text,
                content_id text,
                grade_id uuid,
                PRIMARY KEY ((student_id, content_id))
            )",
        ];

        for statement in statements {
            self.client.session().query_unpaged(statement, ()).await?;
        }
        Ok(())
    }

    async fn query_grades(&self, query: String, values: impl SerializeRow) -> Result<Vec<Grade>> {
        let result = self.client.session().query_unpaged(query, values).await?;
        let rows = result.into_rows_result().map_err(PersistenceError::scylla)?;

        let mut grades = rows
            .rows::<GradeRow>()
            .map_err(PersistenceError::scylla)?
            .map(|row| row.map(grade_from_row).map_err(PersistenceError::scylla))
            .collect::<Result<Vec<_>>>()?;
        grades.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(grades)
    }

    /// Claim `(student, content)` for `grade_id`; false if already taken
    async fn claim_pair(&self, student_id: &str, content_id: &str, grade_id: Uuid) -> Result<bool> {
        let result = self
            .client
            .session()
            .query_unpaged(
                "INSERT INTO grade_pairs (student_id, content_id, grade_id) \
                 VALUES (?, ?, ?) IF NOT EXISTS",
                (student_id, content_id, grade_id),
            )
            .await?;
        if applied(result)? {
            return Ok(true);
        }

        let Some(holder) = self.pair_holder(student_id, content_id).await? else {
            return Ok(false);
        };
        if !claim_is_stale(holder, Utc::now()) || self.find_by_id(holder).await?.is_some() {
            return Ok(false);
        }

        tracing::warn!(
            student_id,
            content_id,
            stale_grade_id = %holder,
            "Taking over grade pair claim without a grade"
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                "UPDATE grade_pairs SET grade_id = ? \
                 WHERE student_id = ? AND content_id = ? IF grade_id = ?",
                (grade_id, student_id, content_id, holder),
            )
            .await?;
        applied(result)
    }

    /// Drop the claim if `grade_id` still holds it
    async fn release_pair(&self, student_id: &str, content_id: &str, grade_id: Uuid) -> Result<()> {
        self.client
            .session()
            .query_unpaged(
                "DELETE FROM grade_pairs WHERE student_id = ? AND content_id = ? IF grade_id = ?",
                (student_id, content_id, grade_id),
            )
            .await?;
        Ok(())
    }

    async fn pair_holder(&self, student_id: &str, content_id: &str) -> Result<Option<Uuid>> {
        let result = self
            .client
            .session()
            .query_unpaged(
                "SELECT grade_id FROM grade_pairs WHERE student_id = ? AND content_id = ?",
                (student_id, content_id),
            )
            .await?;

        Ok(result
            .into_rows_result()
            .map_err(PersistenceError::scylla)?
            .maybe_first_row::<(Uuid,)>()
            .map_err(PersistenceError::scylla)?
            .map(|(id,)| id))
    }
}

#[async_trait]
impl GradeRepository for ScyllaGradeRepository {
    async fn find(&self, filter: &GradeFilter) -> Result<Vec<Grade>> {
        match filter.scope() {
            FilterScope::Student(student_id) => {
                self.query_grades(
                    format!("SELECT {GRADE_COLUMNS} FROM grades WHERE student_id = ?"),
                    (student_id,),
                )
                .await
            }
            FilterScope::Content(content_id) => {
                self.query_grades(
                    format!("SELECT {GRADE_COLUMNS} FROM grades WHERE content_id = ?"),
                    (content_id,),
                )
                .await
            }
            FilterScope::Both {
                student_id,
                content_id,
            } => Ok(self
                .find_by_pair(student_id, content_id)
                .await?
                .into_iter()
                .collect()),
            FilterScope::Unfiltered => {
                self.query_grades(format!("SELECT {GRADE_COLUMNS} FROM grades"), ())
                    .await
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Grade>> {
        let mut grades = self
            .query_grades(
                format!("SELECT {GRADE_COLUMNS} FROM grades WHERE id = ?"),
                (id,),
            )
            .await?;
        Ok(grades.pop())
    }

    async fn find_by_pair(&self, student_id: &str, content_id: &str) -> Result<Option<Grade>> {
        match self.pair_holder(student_id, content_id).await? {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn insert(&self, grade: NewGrade) -> Result<Grade> {
        let id = Uuid::now_v7();

        if !self
            .claim_pair(&grade.student_id, &grade.content_id, id)
            .await?
        {
            return Err(PersistenceError::UniqueViolation {
                student_id: grade.student_id,
                content_id: grade.content_id,
            });
        }

        let stored = Grade {
            id,
            student_id: grade.student_id,
            content_id: grade.content_id,
            value: grade.value,
            note: grade.note,
            created_at: Utc::now(),
        };

        let written = self
            .client
            .session()
            .query_unpaged(
                format!(
                    "INSERT INTO grades ({GRADE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?) IF NOT EXISTS"
                ),
                (
                    stored.id,
                    stored.student_id.as_str(),
                    stored.content_id.as_str(),
                    stored.value,
                    stored.note.as_deref(),
                    stored.created_at.timestamp_millis(),
                ),
            )
            .await;

        if let Err(e) = written {
            // Give the pair back so a retry is not reported as a duplicate
            if let Err(release) = self
                .release_pair(&stored.student_id, &stored.content_id, id)
                .await
            {
                tracing::error!(
                    grade_id = %id,
                    error = %release,
                    "Failed to release grade pair; it stays claimed until stale"
                );
            }
            return Err(e.into());
        }

        tracing::debug!(grade_id = %id, "Grade inserted");
        Ok(stored)
    }

    async fn update(&self, grade: &Grade) -> Result<()> {
        // A plain UPDATE would upsert a row without student/content
        let result = self
            .client
            .session()
            .query_unpaged(
                "UPDATE grades SET value = ?, note = ? WHERE id = ? IF EXISTS",
                (grade.value, grade.note.as_deref(), grade.id),
            )
            .await?;

        if applied(result)? {
            Ok(())
        } else {
            Err(PersistenceError::NotFound {
                entity_type: "grade".to_string(),
                key: grade.id.to_string(),
            })
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        let result = self
            .client
            .session()
            .query_unpaged("DELETE FROM grades WHERE id = ? IF EXISTS", (id,))
            .await?;
        if !applied(result)? {
            return Ok(false);
        }

        self.release_pair(&existing.student_id, &existing.content_id, id)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_row_conversion() {
        let id = Uuid::now_v7();
        let grade = grade_from_row((
            id,
            "s1".into(),
            "c1".into(),
            8.5,
            Some("good".into()),
            1_700_000_000_000,
        ));

        assert_eq!(grade.id, id);
        assert_eq!(grade.value, 8.5);
        assert_eq!(grade.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_applied_flag() {
        let applied = Row {
            columns: vec![Some(CqlValue::Boolean(true))],
        };
        // A rejected LWT echoes the current row after the flag
        let rejected = Row {
            columns: vec![
                Some(CqlValue::Boolean(false)),
                Some(CqlValue::Text("s1".into())),
            ],
        };

        assert!(applied_flag(&applied));
        assert!(!applied_flag(&rejected));
        assert!(!applied_flag(&Row { columns: vec![None] }));
        assert!(!applied_flag(&Row { columns: vec![] }));
    }

    #[test]
    fn test_claim_staleness() {
        let now = Utc::now();
        let fresh = Uuid::now_v7();

        assert!(!claim_is_stale(fresh, now));
        assert!(!claim_is_stale(fresh, now + TimeDelta::seconds(59)));
        assert!(claim_is_stale(fresh, now + TimeDelta::seconds(61)));
        // Ids without a timestamp cannot belong to an insert in progress
        assert!(claim_is_stale(Uuid::new_v4(), now));
    }

    #[test]
    fn test_default_config() {
        let config = ScyllaConfig::default();
        assert_eq!(config.keyspace, "grades");
        assert_eq!(config.replication_factor, 1);
    }
}
