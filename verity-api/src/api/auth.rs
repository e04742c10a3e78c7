//! Session authentication middleware
//!
//! Protected routes require `Authorization: Bearer <session token>`. The
//! token must validate against the session secret and name an existing
//! user; the user id is then available to handlers as [`AuthUser`].

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;
use verity_common::auth::validate_session_token;

use crate::db::users;
use crate::{ApiError, AppState};

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Authentication middleware
///
/// Returns 401 with `{success: false, message}` when the token is missing,
/// invalid, expired, or names an unknown user.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("No authentication token provided".to_string()))?;

    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

    let user_id = validate_session_token(token, &state.session_secret).map_err(|e| {
        debug!(error = %e, "Rejected session token");
        ApiError::Unauthorized("Please authenticate properly".to_string())
    })?;

    if !users::user_exists(&state.db, user_id).await? {
        return Err(ApiError::Unauthorized("User not found".to_string()));
    }

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
