use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;

use crate::app_state::AppState;
use crate::models::api::{AttendanceColumnResponse, AttendanceEntry};

/// GET /api/v1/groups/{group_id}/attendance/{date} — Read back one date column.
pub async fn get_attendance(
    State(state): State<AppState>,
    Path((group_id, date)): Path<(String, String)>,
) -> Result<Json<AttendanceColumnResponse>, StatusCode> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let column = state
        .reconciler
        .read(&group_id, date)
        .await
        .map_err(|e| {
            tracing::error!(group_id = %group_id, error = %e, "Failed to read attendance");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(AttendanceColumnResponse {
        group_id,
        date,
        entries: column
            .into_iter()
            .map(|(student_id, status)| AttendanceEntry { student_id, status })
            .collect(),
    }))
}
