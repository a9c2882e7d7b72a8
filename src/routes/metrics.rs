use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint for job counters and processing times.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Registers descriptions for the job metrics recorded by the controller.
pub fn describe_metrics() {
    metrics::describe_histogram!(
        "attendance_job_processing_seconds",
        metrics::Unit::Seconds,
        "Time to process one video attendance job"
    );
    metrics::describe_counter!("attendance_jobs_total", "Total video jobs enqueued");
    metrics::describe_counter!("attendance_jobs_completed", "Video jobs that completed");
    metrics::describe_counter!("attendance_jobs_failed", "Video jobs that failed");
}
