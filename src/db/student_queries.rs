use sqlx::{PgPool, Row};

use super::StoreError;
use crate::models::student::{EncodingVector, StudentEncoding};

/// Contact and encoding data for one enrolled student.
#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub student_id: String,
    pub group_id: String,
    pub name: String,
    pub email: String,
    pub encodings: Vec<EncodingVector>,
}

/// Insert a newly enrolled student. Fails with `Conflict` if the id is taken.
pub async fn insert_student(pool: &PgPool, student: &StudentRecord) -> Result<(), StoreError> {
    let encodings = serde_json::to_value(&student.encodings)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO students (student_id, group_id, name, email, encodings)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id) DO NOTHING
        "#,
    )
    .bind(&student.student_id)
    .bind(&student.group_id)
    .bind(&student.name)
    .bind(&student.email)
    .bind(encodings)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(student.student_id.clone()));
    }
    Ok(())
}

pub async fn student_exists(pool: &PgPool, student_id: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM students WHERE student_id = $1) AS found")
        .bind(student_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("found")?)
}

/// Reference encodings for a group in enrollment order
pub async fn get_group_encodings(
    pool: &PgPool,
    group_id: &str,
) -> Result<Vec<StudentEncoding>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT student_id, group_id, encodings
        FROM students
        WHERE group_id = $1
        ORDER BY created_at ASC, student_id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<StudentEncoding, StoreError> {
            let student_id: String = r.try_get("student_id")?;
            let raw: serde_json::Value = r.try_get("encodings")?;
            let encodings: Vec<EncodingVector> = serde_json::from_value(raw).map_err(|e| {
                StoreError::Corrupt(format!("encodings for {student_id}: {e}"))
            })?;
            Ok(StudentEncoding {
                student_id,
                group_id: r.try_get("group_id")?,
                encodings,
            })
        })
        .collect()
}

/// Email addresses for the given students, in the order given. Unknown ids are skipped.
pub async fn get_emails(pool: &PgPool, student_ids: &[String]) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT s.email
        FROM UNNEST($1::text[]) WITH ORDINALITY AS wanted(student_id, ord)
        JOIN students s ON s.student_id = wanted.student_id
        WHERE s.email <> ''
        ORDER BY wanted.ord
        "#,
    )
    .bind(student_ids)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| r.try_get("email").map_err(StoreError::from))
        .collect()
}
