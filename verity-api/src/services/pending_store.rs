//! Pending-upload store
//!
//! At most one pending location per user, kept in `users.pending_url`.
//! Staging overwrites any previous location; there is no expiry.
//!
//! Owners' open similarity notifications belong to the pending upload they
//! describe. Whenever that upload is replaced or released here, those
//! notifications are resolved as `cancel` in the same transaction, so a
//! pending location exists exactly while decisions on it are open.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;
use verity_common::db::{format_timestamp, ResolutionAction};

use super::{VerifyError, VerifyResult};
use crate::db::notifications;

#[derive(Debug, Clone)]
pub struct PendingUploadStore {
    db: SqlitePool,
}

impl PendingUploadStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record `location` as the user's pending upload
    ///
    /// Returns the location it replaced, whose open notifications are now
    /// cancelled.
    pub async fn stage(&self, user_id: Uuid, location: &str) -> VerifyResult<Option<String>> {
        let mut tx = self.db.begin().await?;

        let previous: Option<(Option<String>,)> =
            sqlx::query_as("SELECT pending_url FROM users WHERE id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let previous = match previous {
            Some((previous,)) => previous,
            None => return Err(VerifyError::NotFound(format!("User {}", user_id))),
        };

        sqlx::query("UPDATE users SET pending_url = ?, updated_at = ? WHERE id = ?")
            .bind(location)
            .bind(format_timestamp(Utc::now()))
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let cancelled = notifications::resolve_open_conflicts(
            &mut *tx,
            user_id,
            None,
            ResolutionAction::Cancel,
            user_id,
        )
        .await?;

        tx.commit().await?;

        if cancelled > 0 {
            info!(%user_id, cancelled, "Superseded upload's conflict notifications cancelled");
        }
        debug!(%user_id, location, "Staged pending upload");
        Ok(previous)
    }

    pub async fn get_pending(&self, user_id: Uuid) -> VerifyResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT pending_url FROM users WHERE id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((pending,)) => Ok(pending),
            None => Err(VerifyError::NotFound(format!("User {}", user_id))),
        }
    }

    /// Drop whatever the user has pending
    pub async fn clear(&self, user_id: Uuid) -> VerifyResult<()> {
        self.release(user_id, None).await
    }

    /// Drop `location` if it is still the user's pending upload
    ///
    /// `NotFound` when the user has a different pending upload or none.
    pub async fn withdraw(&self, user_id: Uuid, location: &str) -> VerifyResult<()> {
        self.release(user_id, Some(location)).await
    }

    async fn release(&self, user_id: Uuid, expected: Option<&str>) -> VerifyResult<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            "UPDATE users SET pending_url = NULL, updated_at = ?
             WHERE id = ? AND (? IS NULL OR pending_url = ?)",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(user_id.to_string())
        .bind(expected)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VerifyError::NotFound(match expected {
                Some(location) => format!("Pending upload {}", location),
                None => format!("User {}", user_id),
            }));
        }

        let cancelled = notifications::resolve_open_conflicts(
            &mut *tx,
            user_id,
            expected,
            ResolutionAction::Cancel,
            user_id,
        )
        .await?;

        tx.commit().await?;

        if cancelled > 0 {
            info!(%user_id, cancelled, "Withdrawn upload's conflict notifications cancelled");
        }
        Ok(())
    }
}
