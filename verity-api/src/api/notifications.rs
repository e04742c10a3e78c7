//! Notification inbox endpoints

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use verity_common::db::{Notification, NotificationStatus};

use super::AuthUser;
use crate::db::notifications;
use crate::pagination::calculate_pagination;
use crate::{ApiError, ApiResult, AppState};

/// Query parameters for GET /notifications
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// "read" or "unread"; all notifications when absent
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total_pages: i64,
    pub current_page: i64,
    pub total_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

fn parse_status(raw: Option<&str>) -> ApiResult<Option<NotificationStatus>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NotificationStatus::parse(&s.to_ascii_lowercase())
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid status filter: {}", s))),
    }
}

fn parse_notification_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Notification not found".to_string()))
}

/// GET /notifications?page&limit&status
///
/// Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<NotificationPage>> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let status = parse_status(query.status.as_deref())?;

    let total_count = notifications::count_for_recipient(&state.db, user_id, status).await?;
    let pagination = calculate_pagination(total_count, query.page, query.limit);

    let items = notifications::list_for_recipient(
        &state.db,
        user_id,
        status,
        pagination.limit,
        pagination.offset,
    )
    .await?;

    Ok(Json(NotificationPage {
        notifications: items,
        total_pages: pagination.total_pages,
        current_page: pagination.page,
        total_count,
    }))
}

/// PUT /notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_notification_id(&id)?;

    let notification = notifications::mark_read(&state.db, user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "notification": notification,
    })))
}

/// PUT /notifications/mark-all-read
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let updated = notifications::mark_all_read(&state.db, user_id).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

/// DELETE /notifications/:id
pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_notification_id(&id)?;

    if !notifications::delete(&state.db, user_id, id).await? {
        return Err(ApiError::NotFound("Notification not found".to_string()));
    }

    Ok(Json(json!({ "success": true })))
}

/// DELETE /notifications
pub async fn clear_notifications(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let deleted = notifications::clear_all(&state.db, user_id).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

/// GET /notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<UnreadCount>> {
    let count = notifications::unread_count(&state.db, user_id).await?;
    Ok(Json(UnreadCount { count }))
}
