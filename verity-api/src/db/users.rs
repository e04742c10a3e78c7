//! User queries

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;
use verity_common::db::{format_timestamp, parse_timestamp, ProfilePicture, User, VerificationStatus};
use verity_common::{Error, Result};

const USER_COLUMNS: &str = "id, linkedin_id, email, name, profile_url, profile_verified, pending_url, \
     profile_signature, profile_uploaded_at, verification_status, created_at, updated_at";

/// A committed picture considered during conflict detection
#[derive(Debug, Clone)]
pub struct CommittedPicture {
    pub user_id: Uuid,
    pub location: String,
    /// Stored signature in its encoded form, if any
    pub signature: Option<String>,
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID {}: {}", value, e)))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let status: String = row.get("verification_status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let uploaded_at: Option<String> = row.get("profile_uploaded_at");

    Ok(User {
        id: parse_uuid(&id)?,
        linkedin_id: row.get("linkedin_id"),
        email: row.get("email"),
        name: row.get("name"),
        profile_picture: ProfilePicture {
            url: row.get("profile_url"),
            verified: row.get::<i64, _>("profile_verified") != 0,
            pending_url: row.get("pending_url"),
            uploaded_at: uploaded_at.as_deref().and_then(parse_timestamp),
        },
        profile_signature: row.get("profile_signature"),
        verification_status: VerificationStatus::parse(&status).unwrap_or(VerificationStatus::Pending),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

pub async fn get_user(db: &SqlitePool, user_id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(user_id.to_string())
        .fetch_optional(db)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

/// Fetch a user or fail with `NotFound`
pub async fn require_user(db: &SqlitePool, user_id: Uuid) -> Result<User> {
    get_user(db, user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))
}

pub async fn user_exists(db: &SqlitePool, user_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

/// Find a user by email, creating it when missing
///
/// An existing user gets its name refreshed and its LinkedIn id filled in if
/// it had none.
pub async fn find_or_create_user(
    db: &SqlitePool,
    email: &str,
    name: &str,
    linkedin_id: Option<&str>,
) -> Result<User> {
    let email = email.trim();
    if email.is_empty() || name.trim().is_empty() {
        return Err(Error::InvalidInput("email and name are required".to_string()));
    }

    let now = format_timestamp(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO users (id, linkedin_id, email, name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            name = excluded.name,
            linkedin_id = COALESCE(users.linkedin_id, excluded.linkedin_id),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(linkedin_id)
    .bind(email)
    .bind(name.trim())
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
        .bind(email)
        .fetch_one(db)
        .await?;
    user_from_row(&row)
}

/// Every user other than `exclude` with a committed picture
pub async fn list_committed_pictures(db: &SqlitePool, exclude: Uuid) -> Result<Vec<CommittedPicture>> {
    let rows = sqlx::query(
        "SELECT id, profile_url, profile_signature FROM users
         WHERE profile_url IS NOT NULL AND id != ?
         ORDER BY id",
    )
    .bind(exclude.to_string())
    .fetch_all(db)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            Ok(CommittedPicture {
                user_id: parse_uuid(&id)?,
                location: row.get("profile_url"),
                signature: row.get("profile_signature"),
            })
        })
        .collect()
}

/// Make `location` the user's committed, verified picture
///
/// Clears the pending upload. With `expected_pending` the update only
/// applies while that location is still the user's pending upload.
/// Returns `NotFound` when no row matched.
pub async fn commit_profile_picture<'e, E>(
    executor: E,
    user_id: Uuid,
    location: &str,
    signature: Option<&str>,
    expected_pending: Option<&str>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = format_timestamp(Utc::now());
    let result = sqlx::query(
        "UPDATE users SET profile_url = ?, profile_verified = 1, profile_signature = ?,
             profile_uploaded_at = ?, pending_url = NULL, updated_at = ?
         WHERE id = ? AND (? IS NULL OR pending_url = ?)",
    )
    .bind(location)
    .bind(signature)
    .bind(&now)
    .bind(&now)
    .bind(user_id.to_string())
    .bind(expected_pending)
    .bind(expected_pending)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(match expected_pending {
            Some(pending) => format!("Pending upload {}", pending),
            None => format!("User {}", user_id),
        }));
    }
    Ok(())
}
