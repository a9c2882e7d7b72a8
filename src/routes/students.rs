use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::EnrollmentResponse;
use crate::models::student::EnrollmentRequest;
use crate::services::enrollment::EnrollmentError;

/// POST /api/v1/students — Enroll a student from one or more face photos.
pub async fn enroll_student(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<EnrollmentResponse>), StatusCode> {
    let mut student_id = None;
    let mut group_id = None;
    let mut name = None;
    let mut email = None;
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let Some(field_name) = field.name().map(String::from) else {
            continue;
        };
        match field_name.as_str() {
            "images" | "images[]" => {
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                images.push(data.to_vec());
            }
            "student_id" | "group_id" | "name" | "email" => {
                let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                match field_name.as_str() {
                    "student_id" => student_id = Some(value),
                    "group_id" => group_id = Some(value),
                    "name" => name = Some(value),
                    _ => email = Some(value),
                }
            }
            _ => {}
        }
    }

    let request = EnrollmentRequest {
        student_id: student_id.ok_or(StatusCode::BAD_REQUEST)?,
        group_id: group_id.ok_or(StatusCode::BAD_REQUEST)?,
        name: name.ok_or(StatusCode::BAD_REQUEST)?,
        email: email.ok_or(StatusCode::BAD_REQUEST)?,
    };

    let summary = state
        .enroller
        .enroll(request, images)
        .await
        .map_err(|e| match e {
            EnrollmentError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EnrollmentError::AlreadyEnrolled(_) => StatusCode::CONFLICT,
            EnrollmentError::NoImages => StatusCode::BAD_REQUEST,
            EnrollmentError::BadImage { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EnrollmentError::FaceApi(e) => {
                tracing::error!(error = %e, "Face service failed during enrollment");
                StatusCode::BAD_GATEWAY
            }
            EnrollmentError::Store(e) => {
                tracing::error!(error = %e, "Failed to store enrollment");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    let message = if summary.encodings == 0 {
        "Student enrolled, but no face was found in any image".to_string()
    } else {
        "Student enrolled".to_string()
    };

    Ok((
        StatusCode::CREATED,
        Json(EnrollmentResponse {
            student_id: summary.student_id,
            encodings: summary.encodings,
            images_without_face: summary.images_without_face,
            message,
        }),
    ))
}
