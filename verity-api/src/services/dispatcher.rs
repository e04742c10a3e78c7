//! Notification dispatcher
//!
//! Conflict fan-out creates one SIMILARITY_DETECTED notification per owner.
//! Inserts run concurrently and independently: a failed insert is logged and
//! reported, the others still land. Outcome notifications (APPROVED or
//! REJECTED) go to the uploader, one per owner decision.

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;
use verity_common::db::{NewNotification, Notification, NotificationKind, ResolutionAction};
use verity_common::events::{EventBus, VerityEvent};

use super::{Conflict, ImageSignature, VerifyError, VerifyResult};
use crate::db::notifications;

/// Per-recipient result of a fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: SqlitePool,
    event_bus: EventBus,
}

impl NotificationDispatcher {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Notify every conflicting owner about the upload
    ///
    /// The payload carries what an owner's later decision needs: the
    /// uploader, the staged location and the staged signature.
    pub async fn notify_conflicts(
        &self,
        conflicts: &[Conflict],
        uploader_id: Uuid,
        pending_location: &str,
        signature: &ImageSignature,
    ) -> FanOutReport {
        let encoded_signature = signature.encode();

        let inserts = conflicts.iter().map(|conflict| {
            let new = NewNotification {
                sender_id: uploader_id,
                recipient_id: conflict.owner_id,
                kind: NotificationKind::SimilarityDetected,
                message: "Someone attempted to upload a profile picture similar to yours"
                    .to_string(),
                payload: json!({
                    "similarity": round2(conflict.similarity),
                    "uploaderId": uploader_id,
                    "uploadId": conflict.upload_id,
                    "pendingLocation": pending_location,
                    "signature": encoded_signature,
                    "timestamp": Utc::now(),
                }),
                resolved: false,
                expires_at: None,
            };
            async move { (conflict.owner_id, notifications::insert(&self.db, &new).await) }
        });

        let mut report = FanOutReport::default();
        for (owner_id, result) in join_all(inserts).await {
            match result {
                Ok(notification) => {
                    self.publish(&notification);
                    report.delivered.push(owner_id);
                }
                Err(e) => {
                    warn!(%owner_id, %uploader_id, error = %e, "Failed to notify owner of similar upload");
                    report.failed.push(owner_id);
                }
            }
        }

        info!(
            %uploader_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Conflict notifications dispatched"
        );
        report
    }

    /// Insert the APPROVED or REJECTED notification for the uploader
    ///
    /// `awaiting` is the number of owners who still have to decide. Runs on
    /// the caller's executor so it can join the resolution transaction; call
    /// [`publish`](Self::publish) once that commits.
    pub async fn notify_outcome<'e, E>(
        &self,
        executor: E,
        uploader_id: Uuid,
        action: ResolutionAction,
        actor_id: Uuid,
        awaiting: i64,
    ) -> VerifyResult<Notification>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let kind = action
            .outcome_kind()
            .ok_or_else(|| VerifyError::InvalidAction(action.to_string()))?;

        let message = match (action, awaiting) {
            (ResolutionAction::Approve, 0) => "Your profile picture has been approved",
            (ResolutionAction::Approve, _) => {
                "An owner approved your profile picture; other owners still have to decide"
            }
            _ => "Your profile picture has been rejected and removed",
        };

        let new = NewNotification {
            sender_id: actor_id,
            recipient_id: uploader_id,
            kind,
            message: message.to_string(),
            payload: json!({
                "action": action,
                "decidedBy": actor_id,
                "awaitingDecisions": awaiting,
                "timestamp": Utc::now(),
            }),
            resolved: true,
            expires_at: None,
        };

        Ok(notifications::insert(executor, &new).await?)
    }

    /// Announce a stored notification to live subscribers
    pub fn publish(&self, notification: &Notification) {
        self.event_bus.emit_lossy(VerityEvent::NotificationCreated {
            notification: notification.clone(),
        });
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
