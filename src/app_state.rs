use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    enrollment::Enroller,
    face_api::{FaceApiClient, FaceEncoder},
    jobs::{JobController, PgJobStore},
    ledger::PgLedger,
    matcher::FaceMatcher,
    notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier},
    pipeline::AttendancePipeline,
    reconciler::LedgerReconciler,
    roster::{PgRoster, Roster},
    video::FfmpegSource,
    worker_pool::WorkerPool,
};

/// Postgres-backed job controller and the collaborators it shares with the API.
pub struct Services {
    pub jobs: Arc<JobController>,
    pub reconciler: Arc<LedgerReconciler>,
    pub roster: Arc<dyn Roster>,
}

impl Services {
    pub fn new(
        db: PgPool,
        config: &AppConfig,
        encoder: Arc<dyn FaceEncoder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let roster: Arc<dyn Roster> = Arc::new(PgRoster::new(db.clone()));
        let reconciler = Arc::new(LedgerReconciler::new(Arc::new(PgLedger::new(db.clone()))));
        let video = Arc::new(FfmpegSource::new());

        let pipeline = AttendancePipeline::new(
            Arc::clone(&roster),
            video,
            encoder,
            Arc::clone(&reconciler),
            notifier,
        )
        .with_matcher(FaceMatcher::new(config.match_tolerance))
        .with_sampling(config.sampling())
        .with_decode_timeout(config.decode_timeout());

        let jobs = Arc::new(JobController::new(
            Arc::new(PgJobStore::new(db)),
            Arc::new(pipeline),
        ));

        Self {
            jobs,
            reconciler,
            roster,
        }
    }
}

/// Webhook notifier when a URL is configured, log-only otherwise.
pub fn notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    })
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub jobs: Arc<JobController>,
    pub workers: Arc<WorkerPool>,
    pub reconciler: Arc<LedgerReconciler>,
    pub enroller: Arc<Enroller>,
    pub face_api: Arc<FaceApiClient>,
}

impl AppState {
    /// Wires the services and starts the in-process worker pool used by dispatch.
    pub fn new(
        db: PgPool,
        config: AppConfig,
        face_api: FaceApiClient,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let face_api = Arc::new(face_api);
        let services = Services::new(db.clone(), &config, face_api.clone(), notifier);
        let workers = WorkerPool::start(
            Arc::clone(&services.jobs),
            config.worker_count,
            config.queue_capacity,
        );
        let enroller = Enroller::new(services.roster, face_api.clone());

        Self {
            db,
            config: Arc::new(config),
            jobs: services.jobs,
            workers: Arc::new(workers),
            reconciler: services.reconciler,
            enroller: Arc::new(enroller),
            face_api,
        }
    }
}
