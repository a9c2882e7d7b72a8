use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::attendance::AttendanceStatus;
use crate::models::job::VideoJob;

/// Metadata portion of a video upload.
#[derive(Debug, Deserialize, Validate)]
pub struct UploadRequest {
    #[garde(length(min = 1, max = 64))]
    pub group_id: String,

    #[garde(length(min = 1, max = 64))]
    pub batch: Option<String>,
}

/// Response after uploading a class video.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub group_id: String,
    pub status: String,
    pub error: Option<String>,
}

impl From<&VideoJob> for JobStatusResponse {
    fn from(job: &VideoJob) -> Self {
        Self {
            job_id: job.id,
            group_id: job.group_id.clone(),
            status: job.status.to_string(),
            error: job.error.clone(),
        }
    }
}

/// Response after a synchronous job run.
#[derive(Debug, Serialize)]
pub struct RunJobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub detected: BTreeSet<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub student_id: String,
    pub encodings: usize,
    pub images_without_face: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AttendanceColumnResponse {
    pub group_id: String,
    pub date: NaiveDate,
    pub entries: Vec<AttendanceEntry>,
}

/// One ledger row. `status` is null for students added after this date was recorded.
#[derive(Debug, Serialize)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: Option<AttendanceStatus>,
}

/// Response after claiming pending jobs onto the worker queue.
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub claimed: usize,
}
