use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::RwLock;

use crate::db::{student_queries, StoreError};
use crate::models::student::StudentEncoding;

pub use crate::db::student_queries::StudentRecord;

/// Enrolled students: reference encodings per group and contact addresses.
#[async_trait]
pub trait Roster: Send + Sync {
    /// Encodings for every student in the group, in enrollment order.
    async fn encodings_for_group(&self, group_id: &str) -> Result<Vec<StudentEncoding>, StoreError>;

    /// Notification addresses for the given students. Students without one are skipped.
    async fn addresses(&self, student_ids: &[String]) -> Result<Vec<String>, StoreError>;

    async fn is_enrolled(&self, student_id: &str) -> Result<bool, StoreError>;

    async fn enroll(&self, student: StudentRecord) -> Result<(), StoreError>;
}

pub struct PgRoster {
    pool: PgPool,
}

impl PgRoster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Roster for PgRoster {
    async fn encodings_for_group(&self, group_id: &str) -> Result<Vec<StudentEncoding>, StoreError> {
        student_queries::get_group_encodings(&self.pool, group_id).await
    }

    async fn addresses(&self, student_ids: &[String]) -> Result<Vec<String>, StoreError> {
        student_queries::get_emails(&self.pool, student_ids).await
    }

    async fn is_enrolled(&self, student_id: &str) -> Result<bool, StoreError> {
        student_queries::student_exists(&self.pool, student_id).await
    }

    async fn enroll(&self, student: StudentRecord) -> Result<(), StoreError> {
        student_queries::insert_student(&self.pool, &student).await
    }
}

/// Roster held in memory, in insertion order.
#[derive(Default)]
pub struct StaticRoster {
    students: RwLock<Vec<StudentRecord>>,
}

impl StaticRoster {
    pub fn new(students: Vec<StudentRecord>) -> Self {
        Self {
            students: RwLock::new(students),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<StudentRecord>>, StoreError> {
        self.students
            .read()
            .map_err(|e| StoreError::Corrupt(format!("roster lock poisoned: {e}")))
    }
}

#[async_trait]
impl Roster for StaticRoster {
    async fn encodings_for_group(&self, group_id: &str) -> Result<Vec<StudentEncoding>, StoreError> {
        Ok(self
            .read()?
            .iter()
            .filter(|s| s.group_id == group_id)
            .map(|s| StudentEncoding {
                student_id: s.student_id.clone(),
                group_id: s.group_id.clone(),
                encodings: s.encodings.clone(),
            })
            .collect())
    }

    async fn addresses(&self, student_ids: &[String]) -> Result<Vec<String>, StoreError> {
        let students = self.read()?;
        Ok(student_ids
            .iter()
            .filter_map(|id| students.iter().find(|s| &s.student_id == id))
            .filter(|s| !s.email.is_empty())
            .map(|s| s.email.clone())
            .collect())
    }

    async fn is_enrolled(&self, student_id: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.iter().any(|s| s.student_id == student_id))
    }

    async fn enroll(&self, student: StudentRecord) -> Result<(), StoreError> {
        let mut students = self
            .students
            .write()
            .map_err(|e| StoreError::Corrupt(format!("roster lock poisoned: {e}")))?;
        if students.iter().any(|s| s.student_id == student.student_id) {
            return Err(StoreError::Conflict(student.student_id));
        }
        students.push(student);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, group: &str, email: &str) -> StudentRecord {
        StudentRecord {
            student_id: id.to_string(),
            group_id: group.to_string(),
            name: id.to_uppercase(),
            email: email.to_string(),
            encodings: vec![vec![0.0; 4]],
        }
    }

    #[tokio::test]
    async fn test_static_roster_filters_by_group() {
        let roster = StaticRoster::new(vec![
            record("a", "10A", "a@school.test"),
            record("b", "10B", "b@school.test"),
            record("c", "10A", "c@school.test"),
        ]);
        let ids: Vec<String> = roster
            .encodings_for_group("10A")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.student_id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_addresses_skip_unknown_and_blank() {
        let roster = StaticRoster::new(vec![
            record("a", "10A", "a@school.test"),
            record("b", "10A", ""),
        ]);
        let wanted = vec!["b".to_string(), "ghost".to_string(), "a".to_string()];
        assert_eq!(roster.addresses(&wanted).await.unwrap(), vec!["a@school.test"]);
    }

    #[tokio::test]
    async fn test_enroll_rejects_duplicates() {
        let roster = StaticRoster::default();
        roster.enroll(record("a", "10A", "a@school.test")).await.unwrap();
        assert!(roster.is_enrolled("a").await.unwrap());
        let err = roster
            .enroll(record("a", "10B", "other@school.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
