//! Caller's own profile

use axum::{extract::State, Extension, Json};
use verity_common::db::User;

use super::AuthUser;
use crate::db::users;
use crate::{ApiResult, AppState};

/// GET /profile
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Json<User>> {
    let user = users::require_user(&state.db, user_id).await?;
    Ok(Json(user))
}
