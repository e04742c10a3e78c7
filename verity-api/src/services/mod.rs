//! Profile picture verification services
//!
//! Leaf-first: signature derivation, signature comparison, conflict
//! detection, pending-upload staging, notification fan-out, and the
//! resolution state machine. `profile_picture` ties them into the upload
//! workflow; `file_storage` owns every filesystem touch.

pub mod conflict_detector;
pub mod dispatcher;
pub mod file_storage;
pub mod pending_store;
pub mod profile_picture;
pub mod resolution;
pub mod signature;
pub mod similarity;

pub use conflict_detector::{Conflict, ConflictDetector, Detection};
pub use dispatcher::{FanOutReport, NotificationDispatcher};
pub use file_storage::FileStorage;
pub use pending_store::PendingUploadStore;
pub use profile_picture::{OwnUploadAction, OwnUploadOutcome, ProfilePictureService, UploadOutcome};
pub use resolution::{ConflictResolver, ResolutionResult};
pub use signature::{ImageSignature, SignatureEngine, SignatureParams};
pub use similarity::similarity;

use thiserror::Error;
use uuid::Uuid;

use crate::utils::LockAware;

/// Verification workflow errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Upload is not a decodable image (400)
    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    /// Signatures derived with different parameters were compared (500)
    #[error("Incompatible signatures: {0}")]
    IncompatibleSignature(String),

    /// Missing notification, user or pending upload (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Decision submitted for an already decided notification (409)
    #[error("Notification {0} already resolved")]
    AlreadyResolved(Uuid),

    /// Decision on a notification whose upload is no longer pending (409)
    #[error("Upload for notification {0} is no longer pending")]
    UploadWithdrawn(Uuid),

    /// Action outside the accepted set (400)
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Filesystem failure; detail is logged, never returned to clients (500)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Common(#[from] verity_common::Error),
}

impl From<sqlx::Error> for VerifyError {
    fn from(err: sqlx::Error) -> Self {
        VerifyError::Common(verity_common::Error::Database(err))
    }
}

impl LockAware for VerifyError {
    fn is_lock_error(&self) -> bool {
        match self {
            VerifyError::Common(err) => err.is_database_locked(),
            _ => false,
        }
    }
}

/// Result type for verification services
pub type VerifyResult<T> = Result<T, VerifyError>;
