use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use clara_attendance::{
    app_state::{self, AppState},
    config::AppConfig,
    db, routes,
    services::face_api::FaceApiClient,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing clara-attendance server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(url = %config.face_api_url, model = %config.face_model, "Initializing face service client");
    let face_api = FaceApiClient::new(&config.face_api_url, &config.face_model)
        .expect("Failed to initialize face service client");

    let notifier = app_state::notifier(&config).expect("Failed to initialize notifier");

    let bind_addr = config.bind_addr.clone();
    let body_limit = config.max_upload_bytes();
    let state = AppState::new(db_pool, config, face_api, notifier);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/videos", post(routes::videos::upload_video))
        .route("/api/v1/jobs/pending", get(routes::videos::list_pending_jobs))
        .route("/api/v1/jobs/dispatch", post(routes::videos::dispatch_jobs))
        .route("/api/v1/jobs/{job_id}", get(routes::videos::get_job_status))
        .route("/api/v1/jobs/{job_id}/run", post(routes::videos::run_job))
        .route("/api/v1/students", post(routes::students::enroll_student))
        .route(
            "/api/v1/groups/{group_id}/attendance/{date}",
            get(routes::attendance::get_attendance),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting clara-attendance on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
