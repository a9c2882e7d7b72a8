use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::db::{queries, StoreError};
use crate::models::job::{JobOutcome, JobReport, JobStatus, VideoJob};
use crate::services::pipeline::AttendancePipeline;

/// Persistent record of video jobs and their status.
///
/// `claim_pending`, `claim` and `finish` are conditional updates: a job moves
/// pending -> processing -> terminal once, whoever calls them.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, group_id: &str, batch: &str, file_path: &str) -> Result<VideoJob, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError>;

    async fn list_pending(&self) -> Result<Vec<VideoJob>, StoreError>;

    /// Moves every pending job to processing, oldest first.
    async fn claim_pending(&self) -> Result<Vec<VideoJob>, StoreError>;

    /// Moves one job to processing if it is still pending.
    async fn claim(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError>;

    /// Moves a processing job to a terminal status. None if it was not processing.
    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Option<VideoJob>, StoreError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, group_id: &str, batch: &str, file_path: &str) -> Result<VideoJob, StoreError> {
        queries::create_job(&self.pool, group_id, batch, file_path).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn list_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        queries::get_pending_jobs(&self.pool).await
    }

    async fn claim_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        queries::claim_pending_jobs(&self.pool).await
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        queries::claim_job(&self.pool, job_id).await
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Option<VideoJob>, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Corrupt(format!("cannot finish a job as {status}")));
        }
        queries::finish_job(&self.pool, job_id, status, error).await
    }
}

/// Job store held in memory, in creation order.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<VideoJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> Result<std::sync::MutexGuard<'_, Vec<VideoJob>>, StoreError> {
        self.jobs
            .lock()
            .map_err(|e| StoreError::Corrupt(format!("job table poisoned: {e}")))
    }

    fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<Option<VideoJob>, StoreError> {
        let mut jobs = self.jobs()?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == job_id && j.status == from) else {
            return Ok(None);
        };
        job.status = to;
        job.error = error.map(String::from);
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, group_id: &str, batch: &str, file_path: &str) -> Result<VideoJob, StoreError> {
        let job = VideoJob::new(group_id, batch, file_path);
        self.jobs()?.push(job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        Ok(self.jobs()?.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        Ok(self
            .jobs()?
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn claim_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        let mut jobs = self.jobs()?;
        let now = Utc::now();
        Ok(jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| {
                j.status = JobStatus::Processing;
                j.updated_at = now;
                j.clone()
            })
            .collect())
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        self.transition(job_id, JobStatus::Pending, JobStatus::Processing, None)
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Option<VideoJob>, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Corrupt(format!("cannot finish a job as {status}")));
        }
        self.transition(job_id, JobStatus::Processing, status, error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} is {status}, not pending")]
    NotClaimable { job_id: Uuid, status: JobStatus },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Owns every job status transition and the media lifecycle.
///
/// Jobs are claimed exactly once, run through the attendance pipeline and
/// finished exactly once. The uploaded video is deleted after a job reaches
/// a terminal state, whether it completed or failed.
pub struct JobController {
    store: Arc<dyn JobStore>,
    pipeline: Arc<AttendancePipeline>,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<AttendancePipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Records a pending job for an uploaded video.
    pub async fn enqueue(&self, group_id: &str, batch: &str, file_path: &str) -> Result<Uuid, StoreError> {
        let job = self.store.create(group_id, batch, file_path).await?;
        metrics::counter!("attendance_jobs_total").increment(1);
        tracing::info!(job_id = %job.id, group_id, file_path, "Video job enqueued");
        Ok(job.id)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<VideoJob>, StoreError> {
        self.store.get(job_id).await
    }

    pub async fn list_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        self.store.list_pending().await
    }

    /// Claims every pending job for processing.
    pub async fn claim_pending(&self) -> Result<Vec<VideoJob>, StoreError> {
        let jobs = self.store.claim_pending().await?;
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Claimed pending jobs");
        }
        Ok(jobs)
    }

    /// Finishes a processing job, then deletes its video.
    ///
    /// Returns false when the job was not processing; nothing is changed then.
    pub async fn complete(&self, job_id: Uuid, outcome: JobOutcome) -> Result<bool, StoreError> {
        let Some(job) = self
            .store
            .finish(job_id, outcome.status(), outcome.error())
            .await?
        else {
            tracing::warn!(job_id = %job_id, "Job was not processing, leaving status untouched");
            return Ok(false);
        };

        match outcome {
            JobOutcome::Completed => {
                metrics::counter!("attendance_jobs_completed").increment(1);
            }
            JobOutcome::Failed(_) => {
                metrics::counter!("attendance_jobs_failed").increment(1);
            }
        }

        remove_media(&job).await;
        Ok(true)
    }

    /// Claims one pending job, runs it and returns how it ended.
    ///
    /// The claim and the run happen on their own task, so a caller that stops
    /// waiting does not leave the job in processing.
    pub async fn run_job(self: &Arc<Self>, job_id: Uuid) -> Result<JobReport, JobError> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.claim_and_execute(job_id).await }).await?
    }

    async fn claim_and_execute(&self, job_id: Uuid) -> Result<JobReport, JobError> {
        match self.store.claim(job_id).await? {
            Some(job) => Ok(self.execute(job).await),
            None => match self.store.get(job_id).await? {
                Some(job) => Err(JobError::NotClaimable {
                    job_id,
                    status: job.status,
                }),
                None => Err(JobError::NotFound(job_id)),
            },
        }
    }

    /// Runs a claimed job against today's date column.
    pub async fn execute(&self, job: VideoJob) -> JobReport {
        let today = Local::now().date_naive();
        self.execute_on(job, today).await
    }

    /// Runs a claimed job and finishes it. Every job that enters ends in a terminal state.
    pub async fn execute_on(&self, job: VideoJob, date: NaiveDate) -> JobReport {
        let started = Instant::now();
        tracing::info!(job_id = %job.id, group_id = %job.group_id, "Processing video job");

        let (outcome, detected) = match self.pipeline.run(&job, date).await {
            Ok(run) => {
                tracing::info!(
                    job_id = %job.id,
                    detected = run.detection.detected.len(),
                    frames_visited = run.detection.frames_visited,
                    frames_skipped = run.detection.frames_skipped,
                    absent = run.report.absentees().len(),
                    "Job completed successfully"
                );
                (JobOutcome::Completed, run.detection.detected)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
                (JobOutcome::Failed(e.to_string()), BTreeSet::new())
            }
        };

        metrics::histogram!("attendance_job_processing_seconds")
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = self.complete(job.id, outcome.clone()).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }

        JobReport {
            job_id: job.id,
            status: outcome.status(),
            error: outcome.error().map(String::from),
            detected,
        }
    }
}

async fn remove_media(job: &VideoJob) {
    match tokio::fs::remove_file(&job.file_path).await {
        Ok(()) => tracing::debug!(job_id = %job.id, file_path = %job.file_path, "Deleted job video"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(job_id = %job.id, file_path = %job.file_path, "Job video already gone");
        }
        Err(e) => tracing::warn!(
            job_id = %job.id,
            file_path = %job.file_path,
            error = %e,
            "Failed to delete job video"
        ),
    }
}
