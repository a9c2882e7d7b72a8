use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::models::job::{JobReport, VideoJob};
use crate::services::jobs::{JobController, JobError};

/// Fixed set of workers fed by a bounded queue of claimed jobs.
///
/// Queueing waits while the queue is full, so claiming never runs far ahead
/// of processing.
pub struct WorkerPool {
    controller: Arc<JobController>,
    sender: mpsc::Sender<VideoJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(controller: Arc<JobController>, worker_count: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<VideoJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let controller = Arc::clone(&controller);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "Worker started");
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else { break };
                        let report = controller.execute(job).await;
                        log_report(worker_id, &report);
                    }
                    tracing::debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        Self {
            controller,
            sender,
            workers,
        }
    }

    /// Claims every pending job and queues it. Returns how many were claimed.
    ///
    /// Claiming and queueing run on their own task, which holds a queue sender
    /// until every claimed job is queued. A caller that stops waiting does not
    /// strand claimed jobs, and `shutdown` waits for them.
    pub async fn dispatch_pending(&self) -> Result<usize, JobError> {
        let controller = Arc::clone(&self.controller);
        let sender = self.sender.clone();

        let dispatch = tokio::spawn(async move {
            let jobs = controller.claim_pending().await?;
            let count = jobs.len();
            for job in jobs {
                enqueue(&controller, &sender, job).await;
            }
            Ok::<_, JobError>(count)
        });

        dispatch.await?
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

/// Queues a claimed job, waiting for room if the queue is full.
async fn enqueue(controller: &JobController, sender: &mpsc::Sender<VideoJob>, job: VideoJob) {
    let job_id = job.id;
    if let Err(mpsc::error::SendError(job)) = sender.send(job).await {
        // Workers are gone; finish the job here so it does not stay processing.
        tracing::warn!(job_id = %job_id, "Worker pool closed, running job inline");
        let report = controller.execute(job).await;
        log_report(usize::MAX, &report);
    }
}

fn log_report(worker_id: usize, report: &JobReport) {
    tracing::debug!(
        worker_id,
        job_id = %report.job_id,
        status = %report.status,
        detected = report.detected.len(),
        "Worker finished job"
    );
}
