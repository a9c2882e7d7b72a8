use clara_attendance::{
    app_state::{self, Services},
    config::AppConfig,
    db,
    routes::metrics::describe_metrics,
    services::{face_api::FaceApiClient, worker_pool::WorkerPool},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting attendance worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Recorder only; the API process serves the scrape endpoint.
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let face_api = FaceApiClient::new(&config.face_api_url, &config.face_model)
        .expect("Failed to initialize face service client");
    let notifier = app_state::notifier(&config).expect("Failed to initialize notifier");

    let services = Services::new(db_pool, &config, Arc::new(face_api), notifier);
    let pool = WorkerPool::start(services.jobs, config.worker_count, config.queue_capacity);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    tracing::info!(
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Worker ready, starting job claim loop"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Claimed jobs are always handed to the pool before shutdown is checked,
    // so none is left in processing.
    loop {
        let pause = match pool.dispatch_pending().await {
            Ok(0) => {
                tracing::trace!("No pending jobs, sleeping");
                poll_interval
            }
            Ok(count) => {
                tracing::debug!(count, "Dispatched pending jobs");
                Duration::ZERO
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim pending jobs, will retry");
                poll_interval
            }
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, draining queued jobs");
                break;
            }
            _ = sleep(pause) => {}
        }
    }

    pool.shutdown().await;
    tracing::info!("Worker stopped");
}
