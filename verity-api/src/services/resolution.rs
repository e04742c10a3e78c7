//! Conflict resolution state machine
//!
//! Each owner whose picture an upload resembles holds one similarity
//! notification about that staged upload. Each notification is resolved
//! exactly once:
//!
//! ```text
//! PENDING_DECISION --approve--> APPROVED
//!                  \--reject--> REJECTED
//!                  \--cancel--> CANCELLED   (upload withdrawn, replaced or committed)
//! ```
//!
//! The staged upload is committed when the last open notification about it
//! is approved. A single reject removes it, clears the uploader's picture and
//! closes the other owners' notifications. `cancel` is never an owner
//! decision; the pending-upload store and the upload workflow apply it.
//!
//! The transition is a compare-and-set on `notifications.resolved` inside
//! the transaction that applies the decision, so two concurrent decisions
//! on one notification cannot both apply. A decision only ever applies to
//! the staged upload its notification describes.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;
use verity_common::db::{format_timestamp, Notification, ProfilePicture, ResolutionAction};
use verity_common::events::{EventBus, VerityEvent};

use super::{FileStorage, NotificationDispatcher, VerifyError, VerifyResult};
use crate::db::{notifications, users};
use crate::utils::retry_on_lock;

/// Outcome of a processed decision
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub action: ResolutionAction,
    /// The uploader the decision applied to
    #[serde(rename = "userId")]
    pub uploader_id: Uuid,
    /// Owners still to decide on the same upload
    pub awaiting_decisions: i64,
    pub profile_picture_status: ProfilePicture,
}

/// What a committed transaction changed
struct Applied {
    uploader_id: Uuid,
    outcome: Notification,
    awaiting: i64,
    promoted: Option<String>,
    discarded: Vec<String>,
}

#[derive(Clone)]
pub struct ConflictResolver {
    db: SqlitePool,
    storage: FileStorage,
    dispatcher: NotificationDispatcher,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl ConflictResolver {
    pub fn new(
        db: SqlitePool,
        storage: FileStorage,
        dispatcher: NotificationDispatcher,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            storage,
            dispatcher,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Apply `deciding_user_id`'s decision on a similarity notification
    ///
    /// Errors: `InvalidAction` for anything but approve/reject, `NotFound`
    /// when the notification is missing or not addressed to the decider,
    /// `AlreadyResolved` when it was resolved before, `UploadWithdrawn` when
    /// the upload it describes is no longer pending. The uploader's profile
    /// is untouched on error.
    pub async fn resolve(
        &self,
        notification_id: Uuid,
        deciding_user_id: Uuid,
        action: &str,
    ) -> VerifyResult<ResolutionResult> {
        let action = ResolutionAction::parse_decision(&action.trim().to_ascii_lowercase())
            .ok_or_else(|| VerifyError::InvalidAction(action.to_string()))?;

        let applied = retry_on_lock("resolve conflict", self.max_lock_wait_ms, || {
            self.apply(notification_id, deciding_user_id, action)
        })
        .await?;

        info!(
            %notification_id,
            uploader_id = %applied.uploader_id,
            owner_id = %deciding_user_id,
            %action,
            awaiting = applied.awaiting,
            "Profile picture conflict resolved"
        );

        let now = Utc::now();
        self.dispatcher.publish(&applied.outcome);
        self.event_bus.emit_lossy(VerityEvent::ConflictResolved {
            notification_id,
            uploader_id: applied.uploader_id,
            owner_id: deciding_user_id,
            action,
            timestamp: now,
        });
        if let Some(url) = &applied.promoted {
            self.event_bus.emit_lossy(VerityEvent::ProfilePictureCommitted {
                user_id: applied.uploader_id,
                url: url.clone(),
                timestamp: now,
            });
        }

        for location in &applied.discarded {
            self.discard(location).await;
        }

        let profile = users::require_user(&self.db, applied.uploader_id).await?;
        Ok(ResolutionResult {
            action,
            uploader_id: applied.uploader_id,
            awaiting_decisions: applied.awaiting,
            profile_picture_status: profile.profile_picture,
        })
    }

    async fn apply(
        &self,
        notification_id: Uuid,
        deciding_user_id: Uuid,
        action: ResolutionAction,
    ) -> VerifyResult<Applied> {
        let mut tx = self.db.begin().await?;
        let now = format_timestamp(Utc::now());

        let claimed = sqlx::query(
            "UPDATE notifications
             SET resolved = 1, status = 'read', read_at = COALESCE(read_at, ?),
                 resolution_action = ?, resolved_by = ?, resolved_at = ?
             WHERE id = ? AND recipient_id = ? AND kind = 'SIMILARITY_DETECTED' AND resolved = 0",
        )
        .bind(&now)
        .bind(action.as_str())
        .bind(deciding_user_id.to_string())
        .bind(&now)
        .bind(notification_id.to_string())
        .bind(deciding_user_id.to_string())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let existing = notifications::get(&mut *tx, notification_id).await?;
            return Err(match existing {
                Some(n) if n.recipient_id == deciding_user_id && n.kind.requires_resolution() => {
                    VerifyError::AlreadyResolved(notification_id)
                }
                _ => VerifyError::NotFound(format!("Notification {}", notification_id)),
            });
        }

        let notification = notifications::get(&mut *tx, notification_id)
            .await?
            .ok_or_else(|| VerifyError::NotFound(format!("Notification {}", notification_id)))?;
        let uploader_id = notification.sender_id;

        let uploader: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT profile_url, pending_url FROM users WHERE id = ?")
                .bind(uploader_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let (current_url, pending) = match uploader {
            Some(row) => row,
            None => return Err(VerifyError::NotFound(format!("User {}", uploader_id))),
        };

        let staged = notification.payload.get("pendingLocation").and_then(|v| v.as_str());
        let location = match pending {
            Some(pending) if staged == Some(pending.as_str()) => pending,
            _ => {
                // The upload this notification describes is gone; close it as such
                sqlx::query("UPDATE notifications SET resolution_action = ?, resolved_by = ? WHERE id = ?")
                    .bind(ResolutionAction::Cancel.as_str())
                    .bind(uploader_id.to_string())
                    .bind(notification_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Err(VerifyError::UploadWithdrawn(notification_id));
            }
        };

        let (awaiting, promoted, discarded) = match action {
            ResolutionAction::Approve => {
                let awaiting =
                    notifications::count_open_conflicts(&mut *tx, uploader_id, &location).await?;
                if awaiting > 0 {
                    (awaiting, None, Vec::new())
                } else {
                    let signature = notification.payload.get("signature").and_then(|v| v.as_str());
                    let bytes = self.storage.read(&location).await?;
                    let committed = self.storage.write_profile(uploader_id, bytes).await?;

                    if let Err(e) = users::commit_profile_picture(
                        &mut *tx,
                        uploader_id,
                        &committed,
                        signature,
                        Some(&location),
                    )
                    .await
                    {
                        self.discard(&committed).await;
                        return Err(e.into());
                    }

                    let superseded = std::iter::once(location).chain(current_url).collect();
                    (0, Some(committed), superseded)
                }
            }
            _ => {
                sqlx::query(
                    "UPDATE users SET profile_url = NULL, pending_url = NULL, profile_verified = 0,
                         profile_signature = NULL, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&now)
                .bind(uploader_id.to_string())
                .execute(&mut *tx)
                .await?;

                let closed = notifications::resolve_open_conflicts(
                    &mut *tx,
                    uploader_id,
                    Some(&location),
                    ResolutionAction::Reject,
                    deciding_user_id,
                )
                .await?;
                if closed > 0 {
                    info!(%uploader_id, closed, "Other owners' notifications closed by rejection");
                }

                (0, None, std::iter::once(location).chain(current_url).collect())
            }
        };

        let outcome = match self
            .dispatcher
            .notify_outcome(&mut *tx, uploader_id, action, deciding_user_id, awaiting)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_promoted(&promoted).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            self.discard_promoted(&promoted).await;
            return Err(e.into());
        }

        Ok(Applied {
            uploader_id,
            outcome,
            awaiting,
            promoted,
            discarded,
        })
    }

    async fn discard_promoted(&self, promoted: &Option<String>) {
        if let Some(location) = promoted {
            self.discard(location).await;
        }
    }

    /// Best-effort delete
    async fn discard(&self, location: &str) {
        if let Err(e) = self.storage.delete(location).await {
            warn!(location, error = %e, "Failed to delete stored file");
        }
    }
}
