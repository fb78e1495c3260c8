//! Approval notifications: the append-only outbox
//!
//! The engine appends notification records; an external delivery
//! pipeline consumes them. The only mutation ever applied to a record
//! is flipping its read flag.

use crate::{RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a notification
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the recipient is being notified
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A request (or a newly activated step) awaits the recipient
    NewRequest,
    Approved,
    Rejected,
    /// A step was escalated to the recipient
    Escalated,
    /// The request's due date is near
    Reminder,
    Expired,
}

/// One outbox row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalNotification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub request_id: RequestId,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalNotification {
    pub fn new(
        recipient: UserId,
        kind: NotificationKind,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient,
            kind,
            request_id,
            is_read: false,
            read_at: None,
            created_at: at,
        }
    }

    pub fn mark_read(&mut self, at: DateTime<Utc>) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(at);
        }
    }
}
