//! Conflict detection
//!
//! Scores an uploaded signature against every other user's committed
//! picture. Candidates are scored concurrently; a candidate that cannot be
//! scored is logged and left out. Detection itself never writes.

use futures::future::join_all;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{similarity, FileStorage, ImageSignature, SignatureEngine, VerifyResult};
use crate::db::users::{self, CommittedPicture};

/// Default similarity a candidate must strictly exceed
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 85.0;

/// An upload that is too similar to another user's committed picture
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Identifies the detection pass that produced this conflict
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub similarity: f64,
}

/// Result of a detection pass
#[derive(Debug, Clone)]
pub struct Detection {
    pub upload_id: Uuid,
    pub signature: ImageSignature,
    /// Highest similarity first; ties ordered by owner id
    pub conflicts: Vec<Conflict>,
}

impl Detection {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Clone)]
pub struct ConflictDetector {
    db: SqlitePool,
    storage: FileStorage,
    engine: SignatureEngine,
    threshold: f64,
}

impl ConflictDetector {
    pub fn new(db: SqlitePool, storage: FileStorage, engine: SignatureEngine, threshold: f64) -> Self {
        Self {
            db,
            storage,
            engine,
            threshold,
        }
    }

    pub fn engine(&self) -> &SignatureEngine {
        &self.engine
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compute the upload's signature, then detect against it
    pub async fn detect(&self, uploader_id: Uuid, image_bytes: Vec<u8>) -> VerifyResult<Detection> {
        let signature = self.engine.compute_blocking(image_bytes).await?;
        self.detect_signature(uploader_id, signature).await
    }

    /// Detect conflicts for an already computed signature
    pub async fn detect_signature(
        &self,
        uploader_id: Uuid,
        signature: ImageSignature,
    ) -> VerifyResult<Detection> {
        let upload_id = Uuid::new_v4();
        let candidates = users::list_committed_pictures(&self.db, uploader_id).await?;
        debug!(%uploader_id, candidates = candidates.len(), "Scoring upload against committed pictures");

        let scores = join_all(
            candidates
                .iter()
                .map(|candidate| self.score_candidate(candidate, &signature)),
        )
        .await;

        let mut conflicts: Vec<Conflict> = candidates
            .iter()
            .zip(scores)
            .filter_map(|(candidate, score)| match score {
                Ok(score) => Some((candidate.user_id, score)),
                Err(e) => {
                    warn!(
                        owner_id = %candidate.user_id,
                        location = %candidate.location,
                        error = %e,
                        "Skipping candidate that could not be compared"
                    );
                    None
                }
            })
            .filter(|(_, score)| *score > self.threshold)
            .map(|(owner_id, similarity)| Conflict {
                upload_id,
                owner_id,
                similarity,
            })
            .collect();

        conflicts.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.owner_id.cmp(&b.owner_id))
        });

        if !conflicts.is_empty() {
            info!(%uploader_id, conflicts = conflicts.len(), "Similar profile pictures found");
        }

        Ok(Detection {
            upload_id,
            signature,
            conflicts,
        })
    }

    /// Similarity of one candidate to the upload
    ///
    /// A stored signature with matching parameters is used directly;
    /// otherwise the committed file is read and signed.
    async fn score_candidate(
        &self,
        candidate: &CommittedPicture,
        uploaded: &ImageSignature,
    ) -> VerifyResult<f64> {
        let stored = candidate
            .signature
            .as_deref()
            .and_then(|s| s.parse::<ImageSignature>().ok())
            .filter(|s| s.params() == uploaded.params());

        let existing = match stored {
            Some(signature) => signature,
            None => {
                let bytes = self.storage.read(&candidate.location).await?;
                self.engine.compute_blocking(bytes).await?
            }
        };

        similarity(uploaded, &existing)
    }
}
