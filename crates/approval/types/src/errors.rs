//! Approval error taxonomy
//!
//! Every error here is local and recoverable: a rejected operation leaves
//! request, action, and document state untouched, and the caller gets
//! enough detail to render a specific message and retry.

use crate::{DocumentId, NotificationId, PageId, RequestId, RequestStatus, UserId, WorkflowId};

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Errors surfaced by the approval workflow engine
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Malformed workflow steps or missing required fields — rejected
    /// before any write
    #[error("validation error: {0}")]
    Validation(String),

    /// The actor is not in the current step's eligible approver set,
    /// even after delegation resolution
    #[error("actor '{actor}' is not an eligible approver for step {step} of request {request}")]
    NotAuthorized {
        request: RequestId,
        actor: UserId,
        step: u32,
    },

    /// The request already reached a terminal status
    #[error("request {request} was already processed (status: {status})")]
    AlreadyProcessed {
        request: RequestId,
        status: RequestStatus,
    },

    /// The actor already recorded a decision on this step — duplicate
    /// submissions are rejected, never silently absorbed
    #[error("actor '{actor}' already recorded a decision on step {step} of request {request}")]
    AlreadyActed {
        request: RequestId,
        actor: UserId,
        step: u32,
    },

    /// Two simultaneous writers raced on the same request; the losing
    /// transaction must recompute from current state before retrying
    #[error("concurrent update on request {request}: {detail}")]
    ConcurrencyConflict { request: RequestId, detail: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("no active workflow configured for page '{0}'")]
    NoWorkflowForPage(PageId),

    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("step {step} not found in workflow {workflow}")]
    StepNotFound { workflow: WorkflowId, step: u32 },

    /// A new delegation intersects an existing one for the same delegator
    #[error("delegation overlaps an existing delegation for '{delegator}'")]
    DelegationOverlap { delegator: UserId },

    #[error("notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("storage backend error: {0}")]
    Storage(String),
}
