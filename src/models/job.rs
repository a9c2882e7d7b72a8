use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a video attendance job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A recorded class video waiting for (or done with) attendance processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoJob {
    pub id: Uuid,
    pub group_id: String,
    pub batch: String,
    pub file_path: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    pub fn new(group_id: &str, batch: &str, file_path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.to_string(),
            batch: batch.to_string(),
            file_path: file_path.to_string(),
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How a job run ended, as handed to the controller's `complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed => None,
            JobOutcome::Failed(e) => Some(e),
        }
    }
}

/// Result of `run_job`: the terminal status and the students seen in the video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub detected: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
