use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::db::StoreError;
use crate::models::attendance::AttendanceReport;
use crate::models::job::VideoJob;
use crate::models::student::ReferenceSet;
use crate::services::aggregator::DetectionAggregator;
use crate::services::face_api::FaceEncoder;
use crate::services::ledger::LedgerError;
use crate::services::matcher::FaceMatcher;
use crate::services::notify::{Notifier, NotifySummary};
use crate::services::reconciler::LedgerReconciler;
use crate::services::roster::Roster;
use crate::services::sampler::{FrameSampler, SamplingConfig};
use crate::services::video::VideoSource;

/// Job-level failures. Any of these marks the job failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No reference encodings enrolled for group {0}")]
    NoReferenceEncodings(String),

    #[error("Roster unavailable: {0}")]
    Roster(#[from] StoreError),

    #[error("Video decode failed: {0}")]
    DecodeFailure(String),

    #[error("Video has no frames")]
    NoFrames,

    #[error("Attendance reconciliation failed: {0}")]
    Reconciliation(#[from] LedgerError),
}

/// What the detection phase saw in one video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub detected: BTreeSet<String>,
    pub frames_sampled: u64,
    pub frames_visited: u64,
    pub frames_skipped: u64,
    pub saturated: bool,
}

/// A completed pipeline run.
#[derive(Debug)]
pub struct PipelineRun {
    pub detection: Detection,
    pub report: AttendanceReport,
    /// Absentee notification running in the background, if anyone was absent.
    pub notification: Option<JoinHandle<NotifySummary>>,
}

/// Turns one uploaded class video into an attendance column.
pub struct AttendancePipeline {
    roster: Arc<dyn Roster>,
    video: Arc<dyn VideoSource>,
    encoder: Arc<dyn FaceEncoder>,
    reconciler: Arc<LedgerReconciler>,
    notifier: Arc<dyn Notifier>,
    matcher: FaceMatcher,
    sampling: SamplingConfig,
    decode_timeout: Duration,
}

impl AttendancePipeline {
    pub fn new(
        roster: Arc<dyn Roster>,
        video: Arc<dyn VideoSource>,
        encoder: Arc<dyn FaceEncoder>,
        reconciler: Arc<LedgerReconciler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            roster,
            video,
            encoder,
            reconciler,
            notifier,
            matcher: FaceMatcher::default(),
            sampling: SamplingConfig::default(),
            decode_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_matcher(mut self, matcher: FaceMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_decode_timeout(mut self, decode_timeout: Duration) -> Self {
        self.decode_timeout = decode_timeout;
        self
    }

    pub fn reconciler(&self) -> &Arc<LedgerReconciler> {
        &self.reconciler
    }

    /// Detects students, records the date column and starts absentee notification.
    pub async fn run(&self, job: &VideoJob, date: NaiveDate) -> Result<PipelineRun, PipelineError> {
        let detection = self.detect(job).await?;

        let report = self
            .reconciler
            .reconcile(&job.group_id, date, &detection.detected)
            .await?;

        let notification = self.spawn_notification(&report);

        Ok(PipelineRun {
            detection,
            report,
            notification,
        })
    }

    /// Samples the video and collects every enrolled student seen in it.
    pub async fn detect(&self, job: &VideoJob) -> Result<Detection, PipelineError> {
        let students = self.roster.encodings_for_group(&job.group_id).await?;
        let references = ReferenceSet::from_students(&students);
        if references.is_empty() {
            return Err(PipelineError::NoReferenceEncodings(job.group_id.clone()));
        }
        let universe = references.universe_size();

        let path = Path::new(&job.file_path);
        let mut reader = timeout(self.decode_timeout, self.video.open(path))
            .await
            .map_err(|_| PipelineError::DecodeFailure("timed out opening video".to_string()))?
            .map_err(|e| PipelineError::DecodeFailure(e.to_string()))?;
        let metadata = reader.metadata().clone();

        let sampler = FrameSampler::new(metadata.total_frames, metadata.fps, &self.sampling);
        if sampler.is_empty() {
            return Err(PipelineError::NoFrames);
        }

        info!(
            job_id = %job.id,
            group_id = %job.group_id,
            total_frames = metadata.total_frames,
            fps = metadata.fps,
            samples = sampler.len(),
            students = universe,
            tolerance = self.matcher.tolerance(),
            "Starting frame sampling"
        );

        let mut aggregator = DetectionAggregator::new();
        let mut detection = Detection {
            frames_sampled: sampler.len(),
            ..Detection::default()
        };

        for index in sampler.iter() {
            if aggregator.is_saturated(universe) {
                debug!(job_id = %job.id, frame = index, "Every enrolled student found, stopping early");
                detection.saturated = true;
                break;
            }

            let frame = match timeout(self.decode_timeout, reader.frame_at(index)).await {
                Err(_) => {
                    return Err(PipelineError::DecodeFailure(format!(
                        "timed out decoding frame {index}"
                    )))
                }
                Ok(Err(e)) => {
                    return Err(PipelineError::DecodeFailure(format!("frame {index}: {e}")))
                }
                Ok(Ok(None)) => {
                    debug!(job_id = %job.id, frame = index, "Video ended before the sampled frame");
                    break;
                }
                Ok(Ok(Some(frame))) => frame,
            };
            detection.frames_visited += 1;

            let encodings = match self.encoder.encode_faces(frame).await {
                Ok(encodings) => encodings,
                Err(e) => {
                    warn!(job_id = %job.id, frame = index, error = %e, "Face encoding failed, skipping frame");
                    detection.frames_skipped += 1;
                    continue;
                }
            };

            let matches = self.matcher.match_frame(&encodings, &references, &mut aggregator);
            for student_id in &matches.newly_detected {
                info!(job_id = %job.id, student_id = %student_id, frame = index, "Student detected");
            }
        }

        detection.saturated = detection.saturated || aggregator.is_saturated(universe);
        detection.detected = aggregator.into_result();
        Ok(detection)
    }

    fn spawn_notification(&self, report: &AttendanceReport) -> Option<JoinHandle<NotifySummary>> {
        let absentees: Vec<String> = report.absentees().into_iter().map(String::from).collect();
        if absentees.is_empty() {
            debug!(group_id = %report.group_id, "No absentees to notify");
            return None;
        }

        let roster = Arc::clone(&self.roster);
        let notifier = Arc::clone(&self.notifier);
        let date = report.date;
        Some(tokio::spawn(async move {
            match roster.addresses(&absentees).await {
                Ok(addresses) => notifier.notify_absent(date, &addresses).await,
                Err(e) => {
                    warn!(error = %e, "Could not resolve absentee addresses");
                    NotifySummary {
                        sent: 0,
                        failed: absentees.len(),
                    }
                }
            }
        }))
    }
}
