//! Profile picture endpoints
//!
//! - `POST /verify/profile-picture`: upload (multipart field `profilePicture`)
//! - `POST /verify/profile-picture/resolve-conflict`: uploader's proceed/cancel
//! - `POST /notifications/profile-picture-decision`: owner's approve/reject

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::AuthUser;
use crate::services::{OwnUploadOutcome, UploadOutcome, VerifyError};
use crate::{ApiError, ApiResult, AppState};

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "profilePicture";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub pending_location: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub notification_id: String,
    pub action: String,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Uploaded file is too large".to_string())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}

pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// POST /verify/profile-picture
///
/// 200 `{success: true, message, profilePicture}` when committed,
/// 200 `{success: false, conflicts, pendingLocation, message}` when staged.
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((file_name, bytes.to_vec()));
    }

    let (file_name, bytes) = match upload {
        Some((name, bytes)) if !bytes.is_empty() => (name, bytes),
        _ => return Err(ApiError::BadRequest("No file uploaded".to_string())),
    };

    info!(%user_id, size = bytes.len(), "Processing profile picture upload");

    let outcome = state
        .profile_pictures
        .upload(user_id, file_name.as_deref(), bytes)
        .await?;

    let body = match outcome {
        UploadOutcome::Committed { profile_picture } => json!({
            "success": true,
            "message": "Profile picture uploaded successfully",
            "profilePicture": profile_picture,
        }),
        UploadOutcome::Conflicted {
            conflicts,
            pending_location,
            ..
        } => json!({
            "success": false,
            "conflicts": conflicts,
            "pendingLocation": pending_location,
            "message": "Similar profile pictures found",
        }),
    };

    Ok(Json(body))
}

/// POST /verify/profile-picture/resolve-conflict
pub async fn resolve_own_conflict(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    body: Result<Json<ResolveConflictRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = json_body(body)?;

    let outcome = state
        .profile_pictures
        .resolve_own_upload(user_id, &request.pending_location, &request.action)
        .await?;

    let body = match outcome {
        OwnUploadOutcome::Committed(profile_picture) => json!({
            "success": true,
            "message": "Profile picture updated successfully",
            "profilePicture": profile_picture,
        }),
        OwnUploadOutcome::Cancelled => json!({
            "success": true,
            "message": "Upload cancelled successfully",
        }),
    };

    Ok(Json(body))
}

/// POST /notifications/profile-picture-decision
///
/// 404 for a missing notification, 400 for an invalid action, 409 when the
/// notification was already decided or its upload is no longer pending.
pub async fn profile_picture_decision(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = json_body(body)?;

    let notification_id = Uuid::parse_str(request.notification_id.trim()).map_err(|_| {
        VerifyError::NotFound(format!("Notification {}", request.notification_id))
    })?;

    let result = state
        .resolver
        .resolve(notification_id, user_id, &request.action)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": result,
    })))
}
