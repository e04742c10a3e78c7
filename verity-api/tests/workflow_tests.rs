//! End-to-end profile picture workflows through the HTTP router
//!
//! Covers:
//! - First upload commits directly
//! - Similar upload is staged and the owner is notified
//! - Owner approval promotes the staged picture
//! - Owner rejection clears the uploader's picture
//! - Second decision on the same notification is refused
//! - Uploader proceed / cancel on their own staged upload
//! - Several owners: commit only after every approval, one reject ends it
//! - Decisions on an upload that was withdrawn, committed or replaced

mod common;

use axum::http::StatusCode;
use common::{png, test_image, TestApp};
use image::ImageFormat;
use serde_json::{json, Value};

/// B commits `png(1)`, then A uploads the same picture and gets staged
async fn staged_conflict(app: &TestApp) -> (String, String, String, String, String) {
    let (_, owner_token) = app.user("bob@example.com", "Bob").await;
    let (_, uploader_token) = app.user("alice@example.com", "Alice").await;

    let (status, body) = app.upload(&owner_token, "bob.png", &png(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{}", body);

    let (status, body) = app.upload(&uploader_token, "alice.png", &png(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false, "{}", body);
    let pending = body["pendingLocation"].as_str().unwrap().to_string();

    let inbox = app.notifications(&owner_token).await;
    assert_eq!(inbox.len(), 1);
    let notification_id = inbox[0]["id"].as_str().unwrap().to_string();

    let uploader_id = app.profile(&uploader_token).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    (owner_token, uploader_token, uploader_id, pending, notification_id)
}

async fn decide(app: &TestApp, token: &str, notification_id: &str, action: &str) -> (StatusCode, Value) {
    app.post_json(
        "/notifications/profile-picture-decision",
        token,
        json!({ "notificationId": notification_id, "action": action }),
    )
    .await
}

#[tokio::test]
async fn test_first_upload_commits() {
    let app = TestApp::new().await;
    let (_, token) = app.user("alice@example.com", "Alice").await;

    let (status, body) = app.upload(&token, "me.png", &png(7)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Profile picture uploaded successfully");

    let url = body["profilePicture"]["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("uploads/"), "unexpected location {}", url);
    assert!(url.ends_with(".jpg"));
    assert!(app.file_exists(&url));

    let profile = app.profile(&token).await;
    assert_eq!(profile["profilePicture"]["url"], url.as_str());
    assert_eq!(profile["profilePicture"]["verified"], true);
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
}

#[tokio::test]
async fn test_unrelated_upload_commits_alongside_others() {
    let app = TestApp::new().await;
    let (_, bob) = app.user("bob@example.com", "Bob").await;
    let (_, alice) = app.user("alice@example.com", "Alice").await;

    let (_, body) = app.upload(&bob, "bob.png", &png(1)).await;
    assert_eq!(body["success"], true);

    let (_, body) = app.upload(&alice, "alice.png", &png(200)).await;
    assert_eq!(body["success"], true, "{}", body);
    assert!(app.notifications(&bob).await.is_empty());
}

#[tokio::test]
async fn test_similar_upload_is_staged_and_owner_notified() {
    let app = TestApp::new().await;
    let (bob_id, bob) = app.user("bob@example.com", "Bob").await;
    let (_, alice) = app.user("alice@example.com", "Alice").await;

    app.upload(&bob, "bob.png", &png(1)).await;
    // Same picture re-encoded in another container
    let (status, body) = app
        .upload(&alice, "alice.bmp", &test_image(1, ImageFormat::Bmp))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Similar profile pictures found");

    let conflicts = body["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["userId"], bob_id.to_string());
    assert!(conflicts[0]["similarity"].as_f64().unwrap() > 85.0);

    let pending = body["pendingLocation"].as_str().unwrap();
    assert!(pending.starts_with("staging/"));
    assert!(app.file_exists(pending));

    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["pendingUrl"], pending);
    assert!(profile["profilePicture"]["url"].is_null());

    let inbox = app.notifications(&bob).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], "SIMILARITY_DETECTED");
    assert_eq!(inbox[0]["status"], "unread");
    assert_eq!(inbox[0]["resolved"], false);
    assert_eq!(inbox[0]["payload"]["pendingLocation"], pending);

    // The uploader is not notified about their own conflict
    assert!(app.notifications(&alice).await.is_empty());
}

#[tokio::test]
async fn test_owner_approval_promotes_staged_picture() {
    let app = TestApp::new().await;
    let (bob, alice, alice_id, pending, notification_id) = staged_conflict(&app).await;

    let (status, body) = decide(&app, &bob, &notification_id, "approve").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["action"], "approve");
    assert_eq!(body["data"]["userId"], alice_id.as_str());
    assert_eq!(body["data"]["awaitingDecisions"], 0);

    // Promoted the same way a direct upload is stored
    let url = body["data"]["profilePictureStatus"]["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("uploads/"), "unexpected location {}", url);
    assert!(url.ends_with(".jpg"));
    assert!(app.file_exists(&url));
    assert!(!app.file_exists(&pending));

    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["url"], url.as_str());
    assert_eq!(profile["profilePicture"]["verified"], true);
    assert!(profile["profilePicture"]["pendingUrl"].is_null());

    let alice_inbox = app.notifications(&alice).await;
    assert_eq!(alice_inbox.len(), 1);
    assert_eq!(alice_inbox[0]["type"], "APPROVED");

    let bob_inbox = app.notifications(&bob).await;
    assert_eq!(bob_inbox[0]["resolved"], true);
    assert_eq!(bob_inbox[0]["resolution"]["action"], "approve");
}

#[tokio::test]
async fn test_owner_rejection_clears_picture() {
    let app = TestApp::new().await;
    let (bob, alice, _, pending, notification_id) = staged_conflict(&app).await;

    let (status, body) = decide(&app, &bob, &notification_id, "reject").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["action"], "reject");

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["url"].is_null());
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
    assert_eq!(profile["profilePicture"]["verified"], false);
    assert!(!app.file_exists(&pending));

    let alice_inbox = app.notifications(&alice).await;
    assert_eq!(alice_inbox.len(), 1);
    assert_eq!(alice_inbox[0]["type"], "REJECTED");
}

#[tokio::test]
async fn test_second_decision_is_refused() {
    let app = TestApp::new().await;
    let (bob, alice, _, _, notification_id) = staged_conflict(&app).await;

    let (status, approved) = decide(&app, &bob, &notification_id, "approve").await;
    assert_eq!(status, StatusCode::OK);
    let url = approved["data"]["profilePictureStatus"]["url"].clone();

    let (status, body) = decide(&app, &bob, &notification_id, "reject").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Notification has already been resolved");

    // Only the approval took effect
    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["url"], url);
    assert_eq!(profile["profilePicture"]["verified"], true);
    assert_eq!(app.notifications(&alice).await.len(), 1);
}

#[tokio::test]
async fn test_uploader_cannot_decide_owner_notification() {
    let app = TestApp::new().await;
    let (_, alice, _, _, notification_id) = staged_conflict(&app).await;

    let (status, _) = decide(&app, &alice, &notification_id, "approve").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_uploader_proceeds_with_staged_upload() {
    let app = TestApp::new().await;
    let (_, alice, _, pending, _) = staged_conflict(&app).await;

    let (status, body) = app
        .post_json(
            "/verify/profile-picture/resolve-conflict",
            &alice,
            json!({ "pendingLocation": pending, "action": "proceed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Profile picture updated successfully");

    let url = body["profilePicture"]["url"].as_str().unwrap();
    assert!(url.starts_with("uploads/"));

    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["url"], url);
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
    assert!(!app.file_exists(&pending));
}

#[tokio::test]
async fn test_uploader_cancels_staged_upload() {
    let app = TestApp::new().await;
    let (_, alice, _, pending, _) = staged_conflict(&app).await;

    let (status, body) = app
        .post_json(
            "/verify/profile-picture/resolve-conflict",
            &alice,
            json!({ "pendingLocation": pending, "action": "cancel" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Upload cancelled successfully");

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
    assert!(profile["profilePicture"]["url"].is_null());
    assert!(!app.file_exists(&pending));
}

#[tokio::test]
async fn test_resolve_own_conflict_requires_own_location() {
    let app = TestApp::new().await;
    let (_, alice, _, _, _) = staged_conflict(&app).await;

    let (status, body) = app
        .post_json(
            "/verify/profile-picture/resolve-conflict",
            &alice,
            json!({ "pendingLocation": "staging/someone_else.png", "action": "proceed" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .post_json(
            "/verify/profile-picture/resolve-conflict",
            &alice,
            json!({ "pendingLocation": "staging/x.png", "action": "later" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn resolve_own(app: &TestApp, token: &str, pending: &str, action: &str) -> (StatusCode, Value) {
    app.post_json(
        "/verify/profile-picture/resolve-conflict",
        token,
        json!({ "pendingLocation": pending, "action": action }),
    )
    .await
}

/// The owner's notification about the upload staged at `pending`
async fn notification_about(app: &TestApp, owner_token: &str, pending: &str) -> Value {
    app.notifications(owner_token)
        .await
        .into_iter()
        .find(|n| n["payload"]["pendingLocation"] == pending)
        .expect("owner notified about the upload")
}

/// Bob and Carol both hold `png(1)`; Alice uploads it and is staged
///
/// Returns the tokens of Bob, Carol and Alice, Alice's staged location and
/// the ids of Bob's and Carol's notifications about it.
async fn two_owner_conflict(app: &TestApp) -> (String, String, String, String, String, String) {
    let (_, bob) = app.user("bob@example.com", "Bob").await;
    let (_, carol) = app.user("carol@example.com", "Carol").await;
    let (_, alice) = app.user("alice@example.com", "Alice").await;

    app.upload(&bob, "bob.png", &png(1)).await;
    let (_, body) = app.upload(&carol, "carol.png", &png(1)).await;
    let carol_pending = body["pendingLocation"].as_str().unwrap().to_string();
    let for_carol = notification_about(app, &bob, &carol_pending).await;
    let (status, _) = decide(app, &bob, for_carol["id"].as_str().unwrap(), "approve").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.upload(&alice, "alice.png", &png(1)).await;
    assert_eq!(body["success"], false, "{}", body);
    assert_eq!(body["conflicts"].as_array().unwrap().len(), 2);
    let pending = body["pendingLocation"].as_str().unwrap().to_string();

    let bob_id = notification_about(app, &bob, &pending).await["id"]
        .as_str()
        .unwrap()
        .to_string();
    let carol_id = notification_about(app, &carol, &pending).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    (bob, carol, alice, pending, bob_id, carol_id)
}

#[tokio::test]
async fn test_staged_upload_waits_for_every_owner() {
    let app = TestApp::new().await;
    let (bob, carol, alice, pending, bob_decision, carol_decision) = two_owner_conflict(&app).await;

    let (status, body) = decide(&app, &bob, &bob_decision, "approve").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["awaitingDecisions"], 1);

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["url"].is_null());
    assert_eq!(profile["profilePicture"]["pendingUrl"], pending.as_str());
    assert_eq!(notification_about(&app, &carol, &pending).await["resolved"], false);

    let (status, body) = decide(&app, &carol, &carol_decision, "approve").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["awaitingDecisions"], 0);

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["url"].as_str().unwrap().starts_with("uploads/"));
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
}

#[tokio::test]
async fn test_one_rejection_ends_multi_owner_conflict() {
    let app = TestApp::new().await;
    let (bob, carol, alice, pending, bob_decision, carol_decision) = two_owner_conflict(&app).await;

    let (status, _) = decide(&app, &bob, &bob_decision, "approve").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = decide(&app, &carol, &carol_decision, "reject").await;
    assert_eq!(status, StatusCode::OK);

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["url"].is_null());
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
    assert!(!app.file_exists(&pending));
}

#[tokio::test]
async fn test_rejection_closes_other_owners_notifications() {
    let app = TestApp::new().await;
    let (bob, carol, alice, pending, bob_decision, carol_decision) = two_owner_conflict(&app).await;

    let (status, _) = decide(&app, &bob, &bob_decision, "reject").await;
    assert_eq!(status, StatusCode::OK);

    let closed = notification_about(&app, &carol, &pending).await;
    assert_eq!(closed["resolved"], true);
    assert_eq!(closed["resolution"]["action"], "reject");

    let (status, _) = decide(&app, &carol, &carol_decision, "approve").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.profile(&alice).await["profilePicture"]["url"].is_null());
}

#[tokio::test]
async fn test_decision_after_cancel_and_new_commit_keeps_picture() {
    let app = TestApp::new().await;
    let (bob, alice, _, pending, notification_id) = staged_conflict(&app).await;

    let (status, _) = resolve_own(&app, &alice, &pending, "cancel").await;
    assert_eq!(status, StatusCode::OK);

    let cancelled = notification_about(&app, &bob, &pending).await;
    assert_eq!(cancelled["resolved"], true);
    assert_eq!(cancelled["resolution"]["action"], "cancel");

    let (_, body) = app.upload(&alice, "other.png", &png(200)).await;
    assert_eq!(body["success"], true, "{}", body);
    let url = body["profilePicture"]["url"].as_str().unwrap().to_string();

    let (status, body) = decide(&app, &bob, &notification_id, "reject").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["url"], url.as_str());
    assert_eq!(profile["profilePicture"]["verified"], true);
    assert!(app.file_exists(&url));
    assert!(app.notifications(&alice).await.is_empty());
}

#[tokio::test]
async fn test_decision_after_proceed_is_refused() {
    let app = TestApp::new().await;
    let (bob, alice, _, pending, notification_id) = staged_conflict(&app).await;

    let (status, body) = resolve_own(&app, &alice, &pending, "proceed").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let url = body["profilePicture"]["url"].clone();

    let (status, _) = decide(&app, &bob, &notification_id, "reject").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let profile = app.profile(&alice).await;
    assert_eq!(profile["profilePicture"]["url"], url);
    assert_eq!(
        notification_about(&app, &bob, &pending).await["resolution"]["action"],
        "cancel"
    );
}

#[tokio::test]
async fn test_decision_on_replaced_upload_is_refused() {
    let app = TestApp::new().await;
    let (bob, alice, _, first, first_decision) = staged_conflict(&app).await;

    // The same picture again, staged under a new location
    let (_, body) = app
        .upload(&alice, "again.bmp", &test_image(1, ImageFormat::Bmp))
        .await;
    assert_eq!(body["success"], false, "{}", body);
    let second = body["pendingLocation"].as_str().unwrap().to_string();
    assert_ne!(first, second);
    assert!(!app.file_exists(&first));

    let (status, _) = decide(&app, &bob, &first_decision, "approve").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["url"].is_null());
    assert_eq!(profile["profilePicture"]["pendingUrl"], second.as_str());

    // The current upload is still decidable
    let current = notification_about(&app, &bob, &second).await;
    let (status, body) = decide(&app, &bob, current["id"].as_str().unwrap(), "approve").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(app.profile(&alice).await["profilePicture"]["url"]
        .as_str()
        .unwrap()
        .starts_with("uploads/"));
}

#[tokio::test]
async fn test_direct_commit_ends_pending_upload() {
    let app = TestApp::new().await;
    let (bob, alice, _, pending, _) = staged_conflict(&app).await;

    let (_, body) = app.upload(&alice, "unrelated.png", &png(200)).await;
    assert_eq!(body["success"], true, "{}", body);

    let profile = app.profile(&alice).await;
    assert!(profile["profilePicture"]["pendingUrl"].is_null());
    assert!(!app.file_exists(&pending));

    let closed = notification_about(&app, &bob, &pending).await;
    assert_eq!(closed["resolved"], true);
    assert_eq!(closed["resolution"]["action"], "cancel");
}
