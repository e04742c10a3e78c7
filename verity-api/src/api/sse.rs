//! Server-Sent Events stream of the caller's notification activity

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::Stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AuthUser;
use crate::db::notifications;
use crate::AppState;

/// Interval between keep-alive comments
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// GET /notifications/stream
///
/// Opens with a `connected` event carrying the unread count, then forwards
/// every bus event addressed to the caller:
/// - NotificationCreated (recipient)
/// - ConflictDetected (uploader)
/// - ConflictResolved (uploader or deciding owner)
/// - ProfilePictureCommitted (the user whose picture changed)
pub async fn notification_stream(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(%user_id, "SSE client connected to notification stream");

    let mut rx = state.event_bus.subscribe();
    let db = state.db.clone();

    let stream = async_stream::stream! {
        let unread = notifications::unread_count(&db, user_id).await.unwrap_or_else(|e| {
            warn!(%user_id, error = %e, "SSE: Failed to read unread count");
            0
        });
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "unreadCount": unread }).to_string()));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !event.is_visible_to(user_id) {
                        continue;
                    }
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(data) => {
                            debug!(%user_id, event_type, "SSE: Forwarding event");
                            yield Ok(Event::default().event(event_type).data(data));
                        }
                        Err(e) => warn!("SSE: Failed to serialize event {}: {}", event_type, e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%user_id, skipped, "SSE: Client lagged behind event bus");
                }
                Err(RecvError::Closed) => {
                    debug!(%user_id, "SSE: Event bus closed");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
