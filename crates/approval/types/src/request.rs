//! Approval requests: the aggregate root of one governed document
//!
//! An ApprovalRequest binds a document to a pinned workflow version and
//! tracks which step is active. Its status is a pure function of the
//! action set recorded against it — the only exceptions are
//! administrative cancellation and due-date expiry.

use crate::{DocumentId, PageId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for an approval request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Status & Priority ────────────────────────────────────────────────

/// Lifecycle status of an approval request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for approvals on the current step
    #[default]
    Pending,
    /// Every step cleared
    Approved,
    /// Some step was vetoed by a rejection
    Rejected,
    /// Administratively withdrawn
    Cancelled,
    /// Due date passed before a decision was reached
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Request priority, for inbox ordering
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

// ── Approval Request ─────────────────────────────────────────────────

/// The aggregate root of one governed document instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique identifier
    pub id: RequestId,
    /// The document type this request belongs to
    pub page_id: PageId,
    /// The workflow version this request was created under. Pinned at
    /// creation and never re-resolved, even if the workflow is edited.
    pub workflow_id: WorkflowId,
    /// Who submitted the document
    pub requester: UserId,
    /// The governed document
    pub document_id: DocumentId,
    /// The document payload conditions are evaluated against
    pub payload: serde_json::Value,
    /// The active step order (1-based)
    pub current_step: u32,
    /// Current status, derived from the recorded action set
    pub status: RequestStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token; the store bumps it on every write
    pub revision: u64,
}

impl ApprovalRequest {
    /// Create a pending request on step 1
    pub fn new(
        page_id: PageId,
        workflow_id: WorkflowId,
        requester: UserId,
        document_id: DocumentId,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::generate(),
            page_id,
            workflow_id,
            requester,
            document_id,
            payload,
            current_step: 1,
            status: RequestStatus::Pending,
            priority: Priority::Normal,
            due_date: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the active step forward. Steps only ever advance.
    pub fn advance_to(&mut self, step_order: u32, at: DateTime<Utc>) {
        debug_assert!(step_order > self.current_step);
        self.current_step = step_order;
        self.updated_at = at;
    }

    /// Terminal transition: all steps cleared
    pub fn approve(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Approved;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Terminal transition: a step was vetoed
    pub fn reject(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Rejected;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Terminal transition: administrative withdrawal
    pub fn cancel(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Cancelled;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Terminal transition: due date passed undecided
    pub fn expire(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Expired;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Whether the due date has passed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.due_date, Some(due) if now >= due)
    }

    /// Whether the due date falls within the given window from now
    pub fn is_due_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        matches!(self.due_date, Some(due) if now < due && due - now <= window)
    }
}
