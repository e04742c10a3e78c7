//! Event types and EventBus for Verity services
//!
//! Events are broadcast in-process over a tokio broadcast channel and can be
//! serialized for SSE transmission to connected clients.

use crate::db::{Notification, ResolutionAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Verity event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VerityEvent {
    /// A notification was stored for `notification.recipient_id`
    ///
    /// Triggers:
    /// - SSE: push to the recipient's inbox stream
    NotificationCreated { notification: Notification },

    /// An upload collided with one or more committed pictures
    ConflictDetected {
        uploader_id: Uuid,
        owner_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// An owner decided on a similarity notification
    ConflictResolved {
        notification_id: Uuid,
        uploader_id: Uuid,
        owner_id: Uuid,
        action: ResolutionAction,
        timestamp: DateTime<Utc>,
    },

    /// A profile picture became the user's committed picture
    ProfilePictureCommitted {
        user_id: Uuid,
        url: String,
        timestamp: DateTime<Utc>,
    },
}

impl VerityEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            VerityEvent::NotificationCreated { .. } => "NotificationCreated",
            VerityEvent::ConflictDetected { .. } => "ConflictDetected",
            VerityEvent::ConflictResolved { .. } => "ConflictResolved",
            VerityEvent::ProfilePictureCommitted { .. } => "ProfilePictureCommitted",
        }
    }

    /// True when the event concerns `user_id` directly
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        match self {
            VerityEvent::NotificationCreated { notification } => {
                notification.recipient_id == user_id
            }
            VerityEvent::ConflictDetected { uploader_id, .. } => *uploader_id == user_id,
            VerityEvent::ConflictResolved {
                uploader_id,
                owner_id,
                ..
            } => *uploader_id == user_id || *owner_id == user_id,
            VerityEvent::ProfilePictureCommitted { user_id: owner, .. } => *owner == user_id,
        }
    }
}

/// Broadcast bus for VerityEvent
///
/// ```
/// use verity_common::events::{EventBus, VerityEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(VerityEvent::ConflictDetected {
///     uploader_id: uuid::Uuid::new_v4(),
///     owner_ids: vec![],
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VerityEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VerityEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers reached
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: VerityEvent,
    ) -> Result<usize, broadcast::error::SendError<VerityEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: VerityEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            debug!(event_type, "No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
