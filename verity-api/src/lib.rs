//! verity-api library interface
//!
//! Profile picture verification service: similarity detection against
//! committed pictures, owner approval of conflicting uploads, and the
//! per-user notification inbox. Exposed as a library for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use verity_common::auth::SessionSecret;
use verity_common::config::{RootLayout, VerityConfig};
use verity_common::events::EventBus;

use crate::services::{
    ConflictDetector, ConflictResolver, FileStorage, NotificationDispatcher, PendingUploadStore,
    ProfilePictureService, SignatureEngine,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus feeding the notification SSE stream
    pub event_bus: EventBus,
    pub storage: FileStorage,
    pub profile_pictures: ProfilePictureService,
    pub resolver: ConflictResolver,
    /// Session token signing secret
    pub session_secret: SessionSecret,
    pub session_ttl: Duration,
    pub max_upload_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        layout: &RootLayout,
        config: &VerityConfig,
        session_secret: SessionSecret,
    ) -> Self {
        let storage = FileStorage::new(layout);
        let engine = SignatureEngine::new(config.signature_size);
        let dispatcher = NotificationDispatcher::new(db.clone(), event_bus.clone());
        let detector = ConflictDetector::new(
            db.clone(),
            storage.clone(),
            engine,
            config.similarity_threshold,
        );
        let profile_pictures = ProfilePictureService::new(
            db.clone(),
            storage.clone(),
            detector,
            PendingUploadStore::new(db.clone()),
            dispatcher.clone(),
            event_bus.clone(),
        );
        let resolver = ConflictResolver::new(
            db.clone(),
            storage.clone(),
            dispatcher,
            event_bus.clone(),
            utils::DEFAULT_MAX_LOCK_WAIT_MS,
        );

        Self {
            db,
            event_bus,
            storage,
            profile_pictures,
            resolver,
            session_secret,
            session_ttl: Duration::hours(config.session_ttl_hours),
            max_upload_bytes: config.max_upload_bytes,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// `/health` is public; everything else requires a bearer session token.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post, put};

    let protected = Router::new()
        .route("/profile", get(api::get_profile))
        .route(
            "/verify/profile-picture",
            post(api::upload_profile_picture)
                .layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route(
            "/verify/profile-picture/resolve-conflict",
            post(api::resolve_own_conflict),
        )
        .route(
            "/notifications/profile-picture-decision",
            post(api::profile_picture_decision),
        )
        .route(
            "/notifications",
            get(api::list_notifications).delete(api::clear_notifications),
        )
        .route("/notifications/mark-all-read", put(api::mark_all_read))
        .route("/notifications/unread-count", get(api::unread_count))
        .route("/notifications/stream", get(api::notification_stream))
        .route("/notifications/:id/read", put(api::mark_read))
        .route(
            "/notifications/:id",
            axum::routing::delete(api::delete_notification),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .merge(api::health_routes())
        .fallback(api::route_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
