use crate::StorageResult;
use approval_types::{
    ActionId, ApprovalAction, ApprovalDelegation, ApprovalNotification, ApprovalRequest,
    ApprovalWorkflow, Decision, DelegationId, DocumentId, DocumentStatus, LinkedDocument,
    NotificationId, PageId, RequestId, StepId, UserId, WorkflowId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage interface for versioned workflow definitions.
///
/// Versions are immutable. Succession (which version superseded which)
/// and soft deletion live beside the version records, never inside them,
/// so historical rows are never rewritten.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Register a new workflow version. When `supersedes` is given, the
    /// old version stops being current and the succession link is
    /// recorded.
    async fn insert_version(
        &self,
        workflow: ApprovalWorkflow,
        supersedes: Option<WorkflowId>,
    ) -> StorageResult<()>;

    /// Resolve a specific version, current or not. Older versions stay
    /// resolvable forever so in-flight requests can read their pinned
    /// step configuration.
    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<ApprovalWorkflow>>;

    /// Current versions for a page: active, not superseded, not deleted,
    /// ordered by priority descending (defaults first on ties).
    async fn current_for_page(&self, page: &PageId) -> StorageResult<Vec<ApprovalWorkflow>>;

    /// The version that superseded the given one, if any.
    async fn replaced_by(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowId>>;

    /// Soft-delete a version; it stays resolvable but is never current.
    async fn soft_delete_workflow(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Storage interface for approval requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert_request(&self, request: ApprovalRequest) -> StorageResult<()>;

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<ApprovalRequest>>;

    /// Write a request back with an optimistic revision check. Fails with
    /// `Conflict` when the stored revision differs from `expected_revision`;
    /// on success the stored revision is bumped and the stored row returned.
    async fn update_request(
        &self,
        request: ApprovalRequest,
        expected_revision: u64,
    ) -> StorageResult<ApprovalRequest>;

    /// All requests still awaiting a decision.
    async fn pending_requests(&self) -> StorageResult<Vec<ApprovalRequest>>;

    /// The most recently created request governing a document.
    async fn latest_request_for_document(
        &self,
        document: &DocumentId,
    ) -> StorageResult<Option<ApprovalRequest>>;
}

/// Storage interface for per-approver action rows.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn insert_action(&self, action: ApprovalAction) -> StorageResult<()>;

    /// Transition an action from pending to decided, atomically. Fails
    /// with `Conflict` when the action is already decided — this is the
    /// guard that makes double-credit impossible.
    async fn decide_action(
        &self,
        id: &ActionId,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalAction>;

    async fn actions_for_step(
        &self,
        request: &RequestId,
        step: &StepId,
    ) -> StorageResult<Vec<ApprovalAction>>;

    async fn actions_for_request(&self, request: &RequestId)
        -> StorageResult<Vec<ApprovalAction>>;

    /// Pending action rows addressed to an approver (their inbox).
    async fn pending_actions_for(&self, approver: &UserId)
        -> StorageResult<Vec<ApprovalAction>>;
}

/// Storage interface for delegations.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Insert a delegation. Fails with `Conflict` when it overlaps an
    /// existing active delegation for the same delegator — overlap is
    /// rejected by construction, never tie-broken at resolution time.
    async fn insert_delegation(&self, delegation: ApprovalDelegation) -> StorageResult<()>;

    /// Delegations in force at the given instant.
    async fn delegations_active_at(
        &self,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ApprovalDelegation>>;

    /// Revoke a delegation.
    async fn deactivate_delegation(&self, id: &DelegationId) -> StorageResult<()>;
}

/// Storage interface for the notification outbox.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn append_notification(&self, notification: ApprovalNotification) -> StorageResult<()>;

    async fn mark_notification_read(
        &self,
        id: &NotificationId,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalNotification>;

    async fn unread_notifications_for(
        &self,
        recipient: &UserId,
    ) -> StorageResult<Vec<ApprovalNotification>>;

    async fn notifications_for_request(
        &self,
        request: &RequestId,
    ) -> StorageResult<Vec<ApprovalNotification>>;
}

/// Storage interface for linked documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_document(&self, document: LinkedDocument) -> StorageResult<()>;

    async fn get_document(&self, id: &DocumentId) -> StorageResult<Option<LinkedDocument>>;

    async fn set_document_status(
        &self,
        id: &DocumentId,
        status: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<LinkedDocument>;
}

/// Unified storage bundle consumed by the engine.
pub trait ApprovalStorage:
    WorkflowStore
    + RequestStore
    + ActionStore
    + DelegationStore
    + NotificationStore
    + DocumentStore
    + Send
    + Sync
{
}

impl<T> ApprovalStorage for T where
    T: WorkflowStore
        + RequestStore
        + ActionStore
        + DelegationStore
        + NotificationStore
        + DocumentStore
        + Send
        + Sync
{
}
