//! Profile picture upload workflow
//!
//! An upload without conflicts is optimized and committed straight away. An
//! upload that collides with other users' pictures is staged as the
//! uploader's pending upload and every owner is notified. The uploader can
//! then push the staged file through (`proceed`) or withdraw it (`cancel`);
//! owners decide through [`ConflictResolver`](super::ConflictResolver).
//!
//! Any commit by the uploader ends the pending upload, so the owners' open
//! notifications about it are cancelled in the commit's transaction.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;
use verity_common::db::{ProfilePicture, ResolutionAction};
use verity_common::events::{EventBus, VerityEvent};

use super::{
    ConflictDetector, FanOutReport, FileStorage, ImageSignature, NotificationDispatcher,
    PendingUploadStore, VerifyError, VerifyResult,
};
use crate::db::{notifications, users};

/// A conflict as reported to the uploader
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub user_id: Uuid,
    /// Percentage rounded to two decimals
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// No conflicts; the picture is now the user's committed picture
    Committed { profile_picture: ProfilePicture },
    /// Similar pictures exist; the upload is staged pending decisions
    Conflicted {
        conflicts: Vec<ConflictSummary>,
        pending_location: String,
        notified: FanOutReport,
    },
}

/// Uploader's own decision on their pending upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnUploadAction {
    Proceed,
    Cancel,
}

impl OwnUploadAction {
    pub fn parse(s: &str) -> VerifyResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proceed" => Ok(OwnUploadAction::Proceed),
            "cancel" => Ok(OwnUploadAction::Cancel),
            _ => Err(VerifyError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OwnUploadOutcome {
    Committed(ProfilePicture),
    Cancelled,
}

#[derive(Clone)]
pub struct ProfilePictureService {
    db: SqlitePool,
    storage: FileStorage,
    detector: ConflictDetector,
    pending: PendingUploadStore,
    dispatcher: NotificationDispatcher,
    event_bus: EventBus,
}

impl ProfilePictureService {
    pub fn new(
        db: SqlitePool,
        storage: FileStorage,
        detector: ConflictDetector,
        pending: PendingUploadStore,
        dispatcher: NotificationDispatcher,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            storage,
            detector,
            pending,
            dispatcher,
            event_bus,
        }
    }

    /// Process an uploaded picture
    pub async fn upload(
        &self,
        user_id: Uuid,
        original_name: Option<&str>,
        bytes: Vec<u8>,
    ) -> VerifyResult<UploadOutcome> {
        users::require_user(&self.db, user_id).await?;

        let detection = self.detector.detect(user_id, bytes.clone()).await?;

        if !detection.has_conflicts() {
            let profile_picture = self.commit(user_id, bytes, &detection.signature, None).await?;
            return Ok(UploadOutcome::Committed { profile_picture });
        }

        let location = self.storage.write_staged(user_id, original_name, &bytes).await?;
        let previous = match self.pending.stage(user_id, &location).await {
            Ok(previous) => previous,
            Err(e) => {
                self.discard(&location).await;
                return Err(e);
            }
        };
        // Last upload wins; the superseded staged file is unreachable now
        if let Some(previous) = previous.filter(|p| *p != location) {
            self.discard(&previous).await;
        }

        let notified = self
            .dispatcher
            .notify_conflicts(&detection.conflicts, user_id, &location, &detection.signature)
            .await;

        self.event_bus.emit_lossy(VerityEvent::ConflictDetected {
            uploader_id: user_id,
            owner_ids: detection.conflicts.iter().map(|c| c.owner_id).collect(),
            timestamp: Utc::now(),
        });

        let conflicts = detection
            .conflicts
            .iter()
            .map(|c| ConflictSummary {
                user_id: c.owner_id,
                similarity: (c.similarity * 100.0).round() / 100.0,
            })
            .collect();

        Ok(UploadOutcome::Conflicted {
            conflicts,
            pending_location: location,
            notified,
        })
    }

    /// Uploader's proceed/cancel on their own pending upload
    ///
    /// `pending_location` must be the caller's current pending upload.
    pub async fn resolve_own_upload(
        &self,
        user_id: Uuid,
        pending_location: &str,
        action: &str,
    ) -> VerifyResult<OwnUploadOutcome> {
        let action = OwnUploadAction::parse(action)?;

        let pending = self.pending.get_pending(user_id).await?;
        if pending.as_deref() != Some(pending_location) {
            return Err(VerifyError::NotFound(format!(
                "Pending upload {}",
                pending_location
            )));
        }

        match action {
            OwnUploadAction::Proceed => {
                let bytes = self.storage.read(pending_location).await?;
                let signature = self.detector.engine().compute_blocking(bytes.clone()).await?;
                let picture = self
                    .commit(user_id, bytes, &signature, Some(pending_location))
                    .await?;
                info!(%user_id, "Pending upload committed by uploader");
                Ok(OwnUploadOutcome::Committed(picture))
            }
            OwnUploadAction::Cancel => {
                self.pending.withdraw(user_id, pending_location).await?;
                self.discard(pending_location).await;
                info!(%user_id, "Pending upload cancelled by uploader");
                Ok(OwnUploadOutcome::Cancelled)
            }
        }
    }

    /// Optimize and store `bytes` as the user's committed picture
    ///
    /// With `expected_pending` the commit only applies while that location
    /// is still the user's pending upload. Files the new picture supersedes
    /// (previous committed picture, pending upload) are deleted once the
    /// database points at the new one.
    async fn commit(
        &self,
        user_id: Uuid,
        bytes: Vec<u8>,
        signature: &ImageSignature,
        expected_pending: Option<&str>,
    ) -> VerifyResult<ProfilePicture> {
        let previous = users::require_user(&self.db, user_id).await?.profile_picture;
        let location = self.storage.write_profile(user_id, bytes).await?;

        if let Err(e) = self
            .record_commit(user_id, &location, signature, expected_pending)
            .await
        {
            self.discard(&location).await;
            return Err(e);
        }

        for superseded in [previous.url, previous.pending_url].into_iter().flatten() {
            if superseded != location {
                self.discard(&superseded).await;
            }
        }

        self.event_bus.emit_lossy(VerityEvent::ProfilePictureCommitted {
            user_id,
            url: location,
            timestamp: Utc::now(),
        });
        Ok(users::require_user(&self.db, user_id).await?.profile_picture)
    }

    async fn record_commit(
        &self,
        user_id: Uuid,
        location: &str,
        signature: &ImageSignature,
        expected_pending: Option<&str>,
    ) -> VerifyResult<()> {
        let mut tx = self.db.begin().await?;

        let encoded = signature.encode();
        users::commit_profile_picture(&mut *tx, user_id, location, Some(&encoded), expected_pending)
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
            info!(%user_id, cancelled, "Open conflict notifications cancelled by commit");
        }
        Ok(())
    }

    /// Best-effort delete
    async fn discard(&self, location: &str) {
        if let Err(e) = self.storage.delete(location).await {
            warn!(location, error = %e, "Failed to delete stored file");
        }
    }
}
