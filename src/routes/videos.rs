use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use garde::Validate;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    DispatchResponse, JobStatusResponse, RunJobResponse, UploadRequest, UploadResponse,
};
use crate::services::jobs::JobError;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm"];

/// POST /api/v1/videos — Upload a class recording and queue it for attendance.
pub async fn upload_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), StatusCode> {
    let dir = PathBuf::from(&state.config.upload_dir).join("videos");
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        tracing::error!(error = %e, dir = %dir.display(), "Failed to create upload directory");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut saved: Option<PathBuf> = None;
    let request = match receive_upload(&dir, multipart, &mut saved).await {
        Ok(request) => request,
        Err(status) => {
            if let Some(path) = &saved {
                discard_upload(path).await;
            }
            return Err(status);
        }
    };
    let path = saved.ok_or(StatusCode::BAD_REQUEST)?;
    let file_path = path.to_string_lossy().into_owned();

    let batch = request.batch.as_deref().unwrap_or(&request.group_id);
    let job_id = match state.jobs.enqueue(&request.group_id, batch, &file_path).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to enqueue video job");
            discard_upload(&path).await;
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id,
            status: "pending".to_string(),
            message: "Video queued for attendance processing".to_string(),
        }),
    ))
}

/// Reads the form, streaming the video into `dir`. `saved` holds the file as
/// soon as it exists so the caller can remove it on any error.
async fn receive_upload(
    dir: &std::path::Path,
    mut multipart: Multipart,
    saved: &mut Option<PathBuf>,
) -> Result<UploadRequest, StatusCode> {
    let mut group_id: Option<String> = None;
    let mut batch: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        match field.name() {
            Some("group_id") => {
                group_id = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("batch") => {
                batch = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("video") => {
                if saved.is_some() {
                    return Err(StatusCode::BAD_REQUEST);
                }
                let extension = video_extension(field.file_name())
                    .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
                *saved = Some(path.clone());
                if write_stream(field, &path).await? == 0 {
                    return Err(StatusCode::BAD_REQUEST);
                }
            }
            _ => {}
        }
    }

    let request = UploadRequest {
        group_id: group_id.ok_or(StatusCode::BAD_REQUEST)?,
        batch: batch.filter(|b| !b.is_empty()),
    };
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    if saved.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(request)
}

/// Writes a body stream to `path` chunk by chunk. Returns the bytes written.
async fn write_stream<S, E>(stream: S, path: &std::path::Path) -> Result<u64, StatusCode>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(path).await.map_err(|e| {
        tracing::error!(error = %e, file_path = %path.display(), "Failed to create upload file");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::warn!(error = %e, "Upload stream ended with an error");
            StatusCode::BAD_REQUEST
        })?;
        file.write_all(&chunk).await.map_err(|e| {
            tracing::error!(error = %e, file_path = %path.display(), "Failed to store uploaded video");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| {
        tracing::error!(error = %e, file_path = %path.display(), "Failed to flush uploaded video");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(written)
}

async fn discard_upload(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(file_path = %path.display(), "Removed rejected upload"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            file_path = %path.display(),
            error = %e,
            "Failed to remove rejected upload"
        ),
    }
}

/// GET /api/v1/jobs/pending — Jobs waiting to be claimed, oldest first.
pub async fn list_pending_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobStatusResponse>>, StatusCode> {
    let jobs = state.jobs.list_pending().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list pending jobs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(jobs.iter().map(JobStatusResponse::from).collect()))
}

/// GET /api/v1/jobs/{job_id} — Check a job's status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    match state.jobs.get(job_id).await {
        Ok(Some(job)) => Ok(Json(JobStatusResponse::from(&job))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/jobs/{job_id}/run — Process one pending job and wait for the result.
pub async fn run_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<RunJobResponse>, StatusCode> {
    match state.jobs.run_job(job_id).await {
        Ok(report) => Ok(Json(RunJobResponse {
            job_id: report.job_id,
            status: report.status.to_string(),
            detected: report.detected,
            error: report.error,
        })),
        Err(JobError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(JobError::NotClaimable { .. }) => Err(StatusCode::CONFLICT),
        Err(e @ (JobError::Store(_) | JobError::Task(_))) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to run job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/jobs/dispatch — Claim every pending job onto the worker queue.
pub async fn dispatch_jobs(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DispatchResponse>), StatusCode> {
    let claimed = state.workers.dispatch_pending().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to dispatch pending jobs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { claimed })))
}

fn video_extension(file_name: Option<&str>) -> Option<String> {
    let ext = std::path::Path::new(file_name?)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}
