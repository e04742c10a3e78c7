//! HTTP API handlers for verity-api

pub mod auth;
pub mod health;
pub mod notifications;
pub mod profile;
pub mod profile_picture;
pub mod sse;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub use auth::{auth_middleware, AuthUser};
pub use health::health_routes;
pub use notifications::{
    clear_notifications, delete_notification, list_notifications, mark_all_read, mark_read,
    unread_count,
};
pub use profile::get_profile;
pub use profile_picture::{profile_picture_decision, resolve_own_conflict, upload_profile_picture};
pub use sse::notification_stream;

/// Fallback for unknown routes
pub async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Route not found" })),
    )
}
