use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::StoreError;
use crate::models::job::{JobStatus, VideoJob};

const JOB_COLUMNS: &str = "id, group_id, batch, file_path, status, error, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<VideoJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status {status_str:?}")))?;

    Ok(VideoJob {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        batch: row.try_get("batch")?,
        file_path: row.try_get("file_path")?,
        status,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new pending video job
pub async fn create_job(
    pool: &PgPool,
    group_id: &str,
    batch: &str,
    file_path: &str,
) -> Result<VideoJob, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO video_jobs (group_id, batch, file_path, status)
        VALUES ($1, $2, $3, 'pending')
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(group_id)
    .bind(batch)
    .bind(file_path)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM video_jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Pending jobs, oldest first
pub async fn get_pending_jobs(pool: &PgPool) -> Result<Vec<VideoJob>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM video_jobs WHERE status = 'pending' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Move every pending job to processing and return the claimed jobs.
///
/// Rows locked by a concurrent claim are skipped, so no job is returned twice.
pub async fn claim_pending_jobs(pool: &PgPool) -> Result<Vec<VideoJob>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE video_jobs
        SET status = 'processing', updated_at = NOW()
        WHERE id IN (
            SELECT id FROM video_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .fetch_all(pool)
    .await?;

    let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
    jobs.sort_by_key(|j| j.created_at);
    Ok(jobs)
}

/// Claim a single job if it is still pending
pub async fn claim_job(pool: &PgPool, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE video_jobs
        SET status = 'processing', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Move a processing job to a terminal status.
///
/// Returns None if the job was not in processing, leaving it untouched.
pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<Option<VideoJob>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE video_jobs
        SET status = $1,
            error = $2,
            updated_at = NOW()
        WHERE id = $3 AND status = 'processing'
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(status.to_string())
    .bind(error)
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}
