//! Database models

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Format a timestamp the way every Verity table stores it
///
/// Fixed-width RFC 3339 in UTC, so lexical order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; `None` for malformed values
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Profile picture state of a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePicture {
    /// Committed image location
    pub url: Option<String>,
    pub verified: bool,
    /// Image awaiting a conflict decision
    pub pending_url: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Overall verification state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "verified" => Some(VerificationStatus::Verified),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

/// User record (subset relevant to verification)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub linkedin_id: Option<String>,
    pub email: String,
    pub name: String,
    pub profile_picture: ProfilePicture,
    /// Encoded signature of the committed picture (never exposed over HTTP)
    #[serde(skip)]
    pub profile_signature: Option<String>,
    pub verification_status: VerificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// Someone uploaded a picture similar to the recipient's
    SimilarityDetected,
    /// The recipient's pending upload was approved by an owner
    Approved,
    /// The recipient's pending upload was rejected by an owner
    Rejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SimilarityDetected => "SIMILARITY_DETECTED",
            NotificationKind::Approved => "APPROVED",
            NotificationKind::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIMILARITY_DETECTED" => Some(NotificationKind::SimilarityDetected),
            "APPROVED" => Some(NotificationKind::Approved),
            "REJECTED" => Some(NotificationKind::Rejected),
            _ => None,
        }
    }

    /// Only similarity notifications await a decision
    pub fn requires_resolution(&self) -> bool {
        matches!(self, NotificationKind::SimilarityDetected)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read state of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(NotificationStatus::Unread),
            "read" => Some(NotificationStatus::Read),
            _ => None,
        }
    }
}

/// How a similarity notification was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    /// Owner approved the upload
    Approve,
    /// Owner rejected the upload
    Reject,
    /// The upload went away before the owner decided (withdrawn, replaced
    /// or committed by the uploader)
    Cancel,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::Approve => "approve",
            ResolutionAction::Reject => "reject",
            ResolutionAction::Cancel => "cancel",
        }
    }

    /// Parse the stored form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(ResolutionAction::Approve),
            "reject" => Some(ResolutionAction::Reject),
            "cancel" => Some(ResolutionAction::Cancel),
            _ => None,
        }
    }

    /// Parse an owner's decision; only approve and reject are accepted
    pub fn parse_decision(s: &str) -> Option<Self> {
        Self::parse(s).filter(|action| action.outcome_kind().is_some())
    }

    /// Kind of the notification sent to the uploader for this decision
    pub fn outcome_kind(&self) -> Option<NotificationKind> {
        match self {
            ResolutionAction::Approve => Some(NotificationKind::Approved),
            ResolutionAction::Reject => Some(NotificationKind::Rejected),
            ResolutionAction::Cancel => None,
        }
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution metadata of a decided notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub action: ResolutionAction,
    pub resolved_by: Uuid,
    pub resolved_at: DateTime<Utc>,
}

/// Persistent notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    /// Free-form payload (similarity, uploader, pending location, ...)
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub resolved: bool,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for inserting a notification
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub payload: serde_json::Value,
    /// Outcome notifications are terminal and stored as resolved
    pub resolved: bool,
    pub expires_at: Option<DateTime<Utc>>,
}
