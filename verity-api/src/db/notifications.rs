//! Notification queries
//!
//! Every inbox query is scoped to the recipient, so one user can never read
//! or modify another user's notifications through these functions.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;
use verity_common::db::{
    format_timestamp, parse_timestamp, NewNotification, Notification, NotificationKind,
    NotificationStatus, Resolution, ResolutionAction,
};
use verity_common::{Error, Result};

const NOTIFICATION_COLUMNS: &str = "id, sender_id, recipient_id, kind, message, payload, status, \
     resolved, resolution_action, resolved_by, resolved_at, created_at, read_at, expires_at";

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID {}: {}", value, e)))
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    let id: String = row.get("id");
    let sender_id: String = row.get("sender_id");
    let recipient_id: String = row.get("recipient_id");
    let kind: String = row.get("kind");
    let payload: String = row.get("payload");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let read_at: Option<String> = row.get("read_at");
    let expires_at: Option<String> = row.get("expires_at");

    let action: Option<String> = row.get("resolution_action");
    let resolved_by: Option<String> = row.get("resolved_by");
    let resolved_at: Option<String> = row.get("resolved_at");

    let resolution = match (action, resolved_by, resolved_at) {
        (Some(action), Some(by), Some(at)) => Some(Resolution {
            action: ResolutionAction::parse(&action)
                .ok_or_else(|| Error::Internal(format!("Unknown resolution action: {}", action)))?,
            resolved_by: parse_uuid(&by)?,
            resolved_at: parse_timestamp(&at)
                .ok_or_else(|| Error::Internal(format!("Invalid timestamp: {}", at)))?,
        }),
        _ => None,
    };

    Ok(Notification {
        id: parse_uuid(&id)?,
        sender_id: parse_uuid(&sender_id)?,
        recipient_id: parse_uuid(&recipient_id)?,
        kind: NotificationKind::parse(&kind)
            .ok_or_else(|| Error::Internal(format!("Unknown notification kind: {}", kind)))?,
        message: row.get("message"),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        status: NotificationStatus::parse(&status).unwrap_or(NotificationStatus::Unread),
        resolved: row.get::<i64, _>("resolved") != 0,
        resolution,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        read_at: read_at.as_deref().and_then(parse_timestamp),
        expires_at: expires_at.as_deref().and_then(parse_timestamp),
    })
}

/// Insert a notification and return the stored record
///
/// Accepts a pool or a transaction connection.
pub async fn insert<'e, E>(executor: E, new: &NewNotification) -> Result<Notification>
where
    E: Executor<'e, Database = Sqlite>,
{
    let notification = Notification {
        id: Uuid::new_v4(),
        sender_id: new.sender_id,
        recipient_id: new.recipient_id,
        kind: new.kind,
        message: new.message.clone(),
        payload: new.payload.clone(),
        status: NotificationStatus::Unread,
        resolved: new.resolved,
        resolution: None,
        created_at: Utc::now(),
        read_at: None,
        expires_at: new.expires_at,
    };

    sqlx::query(
        r#"
        INSERT INTO notifications
            (id, sender_id, recipient_id, kind, message, payload, status, resolved, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(notification.id.to_string())
    .bind(notification.sender_id.to_string())
    .bind(notification.recipient_id.to_string())
    .bind(notification.kind.as_str())
    .bind(&notification.message)
    .bind(notification.payload.to_string())
    .bind(notification.status.as_str())
    .bind(notification.resolved as i64)
    .bind(format_timestamp(notification.created_at))
    .bind(notification.expires_at.map(format_timestamp))
    .execute(executor)
    .await?;

    Ok(notification)
}

pub async fn get<'e, E>(executor: E, id: Uuid) -> Result<Option<Notification>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM notifications WHERE id = ?",
        NOTIFICATION_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(notification_from_row).transpose()
}

/// One page of a recipient's notifications, newest first
pub async fn list_for_recipient(
    db: &SqlitePool,
    recipient_id: Uuid,
    status: Option<NotificationStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Notification>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM notifications
         WHERE recipient_id = ? AND (? IS NULL OR status = ?)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ? OFFSET ?",
        NOTIFICATION_COLUMNS
    ))
    .bind(recipient_id.to_string())
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;

    rows.iter().map(notification_from_row).collect()
}

pub async fn count_for_recipient(
    db: &SqlitePool,
    recipient_id: Uuid,
    status: Option<NotificationStatus>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND (? IS NULL OR status = ?)",
    )
    .bind(recipient_id.to_string())
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_one(db)
    .await?;
    Ok(count)
}

pub async fn unread_count(db: &SqlitePool, recipient_id: Uuid) -> Result<i64> {
    count_for_recipient(db, recipient_id, Some(NotificationStatus::Unread)).await
}

/// Mark one notification read; `None` when it is not the recipient's
///
/// An already read notification keeps its original `read_at`.
pub async fn mark_read(db: &SqlitePool, recipient_id: Uuid, id: Uuid) -> Result<Option<Notification>> {
    sqlx::query(
        "UPDATE notifications SET status = 'read', read_at = COALESCE(read_at, ?)
         WHERE id = ? AND recipient_id = ?",
    )
    .bind(format_timestamp(Utc::now()))
    .bind(id.to_string())
    .bind(recipient_id.to_string())
    .execute(db)
    .await?;

    Ok(get(db, id).await?.filter(|n| n.recipient_id == recipient_id))
}

/// Mark every unread notification of the recipient read
pub async fn mark_all_read(db: &SqlitePool, recipient_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE notifications SET status = 'read', read_at = ?
         WHERE recipient_id = ? AND status = 'unread'",
    )
    .bind(format_timestamp(Utc::now()))
    .bind(recipient_id.to_string())
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Delete one notification; false when it is not the recipient's
pub async fn delete(db: &SqlitePool, recipient_id: Uuid, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND recipient_id = ?")
        .bind(id.to_string())
        .bind(recipient_id.to_string())
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn clear_all(db: &SqlitePool, recipient_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM notifications WHERE recipient_id = ?")
        .bind(recipient_id.to_string())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Open similarity notifications an uploader's staged upload still waits on
pub async fn count_open_conflicts<'e, E>(
    executor: E,
    uploader_id: Uuid,
    pending_location: &str,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications
         WHERE sender_id = ? AND kind = 'SIMILARITY_DETECTED' AND resolved = 0
           AND json_extract(payload, '$.pendingLocation') = ?",
    )
    .bind(uploader_id.to_string())
    .bind(pending_location)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Resolve the uploader's open similarity notifications without a decision
///
/// Limited to one staged upload when `pending_location` is given, otherwise
/// every open notification the uploader caused. Returns how many were closed.
pub async fn resolve_open_conflicts<'e, E>(
    executor: E,
    uploader_id: Uuid,
    pending_location: Option<&str>,
    action: ResolutionAction,
    resolved_by: Uuid,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE notifications
         SET resolved = 1, resolution_action = ?, resolved_by = ?, resolved_at = ?
         WHERE sender_id = ? AND kind = 'SIMILARITY_DETECTED' AND resolved = 0
           AND (? IS NULL OR json_extract(payload, '$.pendingLocation') = ?)",
    )
    .bind(action.as_str())
    .bind(resolved_by.to_string())
    .bind(format_timestamp(Utc::now()))
    .bind(uploader_id.to_string())
    .bind(pending_location)
    .bind(pending_location)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
