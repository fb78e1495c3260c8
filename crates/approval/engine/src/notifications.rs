//! Notification trigger: the engine side of the outbox contract
//!
//! The engine appends records here; delivery (push, email, whatever) is
//! a separate consumer reading the outbox. Nothing in the workflow core
//! depends on a delivery mechanism.

use approval_store::NotificationStore;
use approval_types::{
    ApprovalNotification, ApprovalRequest, ApprovalResult, NotificationId, NotificationKind,
    RequestId, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Appends outbox rows at the engine's notification points.
pub struct NotificationTrigger<S> {
    store: Arc<S>,
}

impl<S: NotificationStore> NotificationTrigger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn append(
        &self,
        recipient: &UserId,
        kind: NotificationKind,
        request: &RequestId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.store
            .append_notification(ApprovalNotification::new(
                recipient.clone(),
                kind,
                request.clone(),
                at,
            ))
            .await?;
        Ok(())
    }

    /// A request (or a newly activated step) awaits these approvers.
    pub async fn step_awaiting(
        &self,
        request: &RequestId,
        approvers: &[UserId],
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        for approver in approvers {
            self.append(approver, NotificationKind::NewRequest, request, at)
                .await?;
        }
        Ok(())
    }

    pub async fn request_approved(
        &self,
        request: &ApprovalRequest,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.append(&request.requester, NotificationKind::Approved, &request.id, at)
            .await
    }

    pub async fn request_rejected(
        &self,
        request: &ApprovalRequest,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.append(&request.requester, NotificationKind::Rejected, &request.id, at)
            .await
    }

    pub async fn escalated(
        &self,
        request: &RequestId,
        to: &UserId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.append(to, NotificationKind::Escalated, request, at).await
    }

    /// Expiry notifies the requester and every approver still undecided.
    pub async fn request_expired(
        &self,
        request: &ApprovalRequest,
        undecided: &[UserId],
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.append(&request.requester, NotificationKind::Expired, &request.id, at)
            .await?;
        for approver in undecided {
            self.append(approver, NotificationKind::Expired, &request.id, at)
                .await?;
        }
        Ok(())
    }

    pub async fn reminder(
        &self,
        request: &RequestId,
        to: &UserId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.append(to, NotificationKind::Reminder, request, at).await
    }

    /// Whether the recipient already has an unread reminder for this
    /// request. Used to keep the sweep from piling up reminders.
    pub async fn has_unread_reminder(
        &self,
        request: &RequestId,
        recipient: &UserId,
    ) -> ApprovalResult<bool> {
        let rows = self.store.notifications_for_request(request).await?;
        Ok(rows.iter().any(|n| {
            n.kind == NotificationKind::Reminder && n.recipient == *recipient && !n.is_read
        }))
    }

    pub async fn mark_read(
        &self,
        id: &NotificationId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalNotification> {
        Ok(self.store.mark_notification_read(id, at).await?)
    }

    pub async fn unread_for(
        &self,
        recipient: &UserId,
    ) -> ApprovalResult<Vec<ApprovalNotification>> {
        Ok(self.store.unread_notifications_for(recipient).await?)
    }
}
