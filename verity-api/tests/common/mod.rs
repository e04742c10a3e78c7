//! Shared helpers for verity-api integration tests
//!
//! Each test gets its own temporary root folder with a fresh database, a
//! router wired exactly as the binary wires it, and helpers for issuing
//! authenticated requests.

#![allow(dead_code)]

use std::io::Cursor;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;
use verity_api::db::users;
use verity_api::{build_router, AppState};
use verity_common::auth::{issue_session_token, load_session_secret, SessionSecret};
use verity_common::config::{RootLayout, VerityConfig};
use verity_common::db::init_database;
use verity_common::events::EventBus;

pub const BOUNDARY: &str = "verity-test-boundary";

pub struct TestApp {
    _temp: TempDir,
    pub layout: RootLayout,
    pub db: SqlitePool,
    pub state: AppState,
    pub secret: SessionSecret,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let temp = tempfile::tempdir().expect("create temp root");
        let layout = RootLayout::new(temp.path().to_path_buf());
        layout.ensure_directories_exist().expect("create root layout");

        let db = init_database(&layout.database_path())
            .await
            .expect("open test database");
        let secret = load_session_secret(&db).await.expect("session secret");

        let config = VerityConfig::default();
        let state = AppState::new(db.clone(), EventBus::new(64), &layout, &config, secret.clone());
        let router = build_router(state.clone());

        Self {
            _temp: temp,
            layout,
            db,
            state,
            secret,
            router,
        }
    }

    /// Enroll a user and return its id plus a valid bearer token
    pub async fn user(&self, email: &str, name: &str) -> (Uuid, String) {
        let user = users::find_or_create_user(&self.db, email, name, None)
            .await
            .expect("enroll user");
        (user.id, self.token_for(user.id))
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        issue_session_token(user_id, &self.secret, Duration::hours(1)).expect("sign token")
    }

    /// Send a request and decode the JSON body (`Value::Null` when empty)
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(authed("GET", uri, token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn put(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(authed("PUT", uri, token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(authed("DELETE", uri, token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let request = authed("POST", uri, token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Upload `bytes` as the `profilePicture` multipart field
    pub async fn upload(&self, token: &str, file_name: &str, bytes: &[u8]) -> (StatusCode, Value) {
        self.upload_field(token, "profilePicture", file_name, bytes)
            .await
    }

    pub async fn upload_field(
        &self,
        token: &str,
        field: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let request = authed("POST", "/verify/profile-picture", token)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(field, file_name, bytes)))
            .unwrap();
        self.send(request).await
    }

    pub async fn profile(&self, token: &str) -> Value {
        let (status, body) = self.get("/profile", token).await;
        assert_eq!(status, StatusCode::OK, "profile fetch failed: {}", body);
        body
    }

    /// Notifications of the token's user, newest first
    pub async fn notifications(&self, token: &str) -> Vec<Value> {
        let (status, body) = self.get("/notifications?limit=100", token).await;
        assert_eq!(status, StatusCode::OK, "inbox fetch failed: {}", body);
        body["notifications"].as_array().cloned().unwrap_or_default()
    }

    /// Whether a root-relative location exists on disk
    pub fn file_exists(&self, location: &str) -> bool {
        self.layout.root().join(location).exists()
    }
}

pub fn authed(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
}

pub fn multipart_body(field: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Deterministic test image; different seeds give unrelated pictures
pub fn test_image(seed: u8, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(96, 64, |x, y| {
        let s = seed as u32;
        Rgb([
            ((x * (s + 3) + y * 7) % 256) as u8,
            ((y * (s + 5) + x * s) % 256) as u8,
            ((x ^ y).wrapping_mul(s + 1) % 256) as u8,
        ])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

pub fn png(seed: u8) -> Vec<u8> {
    test_image(seed, ImageFormat::Png)
}
