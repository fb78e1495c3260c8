//! Approval workflow engine
//!
//! Routes a governed business document through an ordered sequence of
//! approval steps: N-of-M approvals per step, single-rejection veto,
//! time-bounded delegation, escalation and auto-approval windows, and
//! synchronization of the linked document's lifecycle status.
//!
//! # Key invariants
//!
//! - Request status is derived from the full recorded action set, never
//!   from a cached partial view; deriving it twice yields the same
//!   answer.
//! - A request is pinned to the workflow version it was created under;
//!   editing a workflow registers a new version and never touches
//!   in-flight requests.
//! - Every mutation of a request's status and current step goes through
//!   one optimistically-checked write path — human decisions and the
//!   time-triggered sweep alike.
//!
//! # Architecture
//!
//! The [`ApprovalEngine`] facade composes specialized components:
//!
//! - [`StepEvaluator`] — eligibility, skip conditions, and the pure step
//!   verdict
//! - [`ActionProcessor`] — validates and commits decisions
//! - [`DelegationResolver`] — who should currently act for an approver
//! - [`NotificationTrigger`] — appends to the notification outbox
//! - [`DocumentStatusSynchronizer`] — the single writer of linked
//!   document status
//!
//! # Example
//!
//! ```rust
//! use approval_engine::{ApprovalEngine, StaticRoleDirectory};
//! use approval_store::InMemoryApprovalStore;
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let store = Arc::new(InMemoryApprovalStore::new());
//! let roles = Arc::new(StaticRoleDirectory::new());
//! let engine = ApprovalEngine::new(store, roles);
//!
//! let workflow = ApprovalWorkflow::new(PageId::new("leave-request"), "Leave Approval")
//!     .with_step(WorkflowStep::user(1, UserId::new("manager")));
//! engine.save_workflow(workflow, None).await.unwrap();
//!
//! engine
//!     .register_document(LinkedDocument::new(
//!         DocumentId::new("doc-1"),
//!         PageId::new("leave-request"),
//!         UserId::new("alice"),
//!     ))
//!     .await
//!     .unwrap();
//!
//! let request_id = engine
//!     .create_request(
//!         &PageId::new("leave-request"),
//!         UserId::new("alice"),
//!         DocumentId::new("doc-1"),
//!         serde_json::json!({"days": 3}),
//!         Priority::Normal,
//!         None,
//!     )
//!     .await
//!     .unwrap();
//!
//! let status = engine
//!     .process_action(&request_id, &UserId::new("manager"), Decision::Approved, None, Vec::new())
//!     .await
//!     .unwrap();
//! assert_eq!(status, RequestStatus::Approved);
//! # });
//! ```

#![deny(unsafe_code)]

pub mod action_processor;
pub mod delegation;
pub mod document_sync;
pub mod engine;
pub mod notifications;
pub mod role_resolver;
pub mod step_evaluator;
pub mod sweep;

pub use action_processor::ActionProcessor;
pub use delegation::DelegationResolver;
pub use document_sync::DocumentStatusSynchronizer;
pub use engine::ApprovalEngine;
pub use notifications::NotificationTrigger;
pub use role_resolver::{RoleResolver, StaticRoleDirectory};
pub use step_evaluator::{
    auto_approve_due, escalation_due, evaluate_step, StepEvaluator, StepVerdict,
};
pub use sweep::{SweepOutcome, REMINDER_WINDOW_HOURS};
