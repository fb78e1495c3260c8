//! The approval engine facade
//!
//! Composes the workflow store, step evaluator, action processor,
//! delegation resolver, notification trigger, and document synchronizer
//! behind the operations collaborators call: registering workflow
//! versions, creating requests, processing decisions, managing
//! delegations, and reading the notification outbox.
//!
//! The engine coordinates — the heavy lifting lives in the components.

use crate::{
    ActionProcessor, DelegationResolver, DocumentStatusSynchronizer, NotificationTrigger,
    RoleResolver, StepEvaluator,
};
use approval_store::{ApprovalStorage, StorageError};
use approval_types::{
    ApprovalDelegation, ApprovalError, ApprovalNotification, ApprovalRequest, ApprovalResult,
    ApprovalWorkflow, Decision, DelegationId, DocumentId, LinkedDocument, NotificationId, PageId,
    Priority, RequestId, RequestStatus, UserId, WorkflowId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// The entry point of the approval workflow engine.
pub struct ApprovalEngine<S> {
    store: Arc<S>,
    evaluator: StepEvaluator<S>,
    processor: ActionProcessor<S>,
    delegations: DelegationResolver<S>,
    notifications: NotificationTrigger<S>,
    documents: DocumentStatusSynchronizer<S>,
}

impl<S: ApprovalStorage> ApprovalEngine<S> {
    pub fn new(store: Arc<S>, roles: Arc<dyn RoleResolver>) -> Self {
        Self {
            evaluator: StepEvaluator::new(store.clone(), roles.clone()),
            processor: ActionProcessor::new(store.clone(), roles),
            delegations: DelegationResolver::new(store.clone()),
            notifications: NotificationTrigger::new(store.clone()),
            documents: DocumentStatusSynchronizer::new(store.clone()),
            store,
        }
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn processor(&self) -> &ActionProcessor<S> {
        &self.processor
    }

    pub(crate) fn delegation_resolver(&self) -> &DelegationResolver<S> {
        &self.delegations
    }

    pub(crate) fn notifier(&self) -> &NotificationTrigger<S> {
        &self.notifications
    }

    pub(crate) fn document_sync(&self) -> &DocumentStatusSynchronizer<S> {
        &self.documents
    }

    // ── Workflow management ──────────────────────────────────────────

    /// Register a workflow version. With `supersedes` given, the new
    /// version replaces the old one for new requests; the old version's
    /// rows stay untouched and resolvable, so in-flight requests keep
    /// the exact step configuration they were created under.
    pub async fn save_workflow(
        &self,
        mut workflow: ApprovalWorkflow,
        supersedes: Option<WorkflowId>,
    ) -> ApprovalResult<WorkflowId> {
        workflow.validate()?;

        // At most one current default per (page, workflow_type). The
        // version being superseded does not count against itself.
        if workflow.is_default {
            let current = self.store.current_for_page(&workflow.page_id).await?;
            let clash = current.iter().any(|w| {
                w.workflow_type == workflow.workflow_type
                    && w.is_default
                    && Some(&w.id) != supersedes.as_ref()
            });
            if clash {
                return Err(ApprovalError::Validation(format!(
                    "page '{}' already has a default workflow of type '{}'",
                    workflow.page_id, workflow.workflow_type
                )));
            }
        }

        if let Some(old_id) = &supersedes {
            let old = self
                .store
                .get_workflow(old_id)
                .await?
                .ok_or_else(|| ApprovalError::WorkflowNotFound(old_id.clone()))?;
            workflow.version = old.version + 1;
        }

        let id = workflow.id.clone();
        match self.store.insert_version(workflow, supersedes).await {
            Ok(()) => {}
            Err(StorageError::Conflict(detail)) => {
                return Err(ApprovalError::Validation(detail));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(workflow_id = %id, "workflow version registered");
        Ok(id)
    }

    /// Resolve a workflow version, current or superseded.
    pub async fn get_workflow(&self, id: &WorkflowId) -> ApprovalResult<ApprovalWorkflow> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| ApprovalError::WorkflowNotFound(id.clone()))
    }

    /// Current workflow versions for a page, highest priority first.
    pub async fn workflows_for_page(
        &self,
        page: &PageId,
    ) -> ApprovalResult<Vec<ApprovalWorkflow>> {
        Ok(self.store.current_for_page(page).await?)
    }

    /// The version that superseded the given one, if any.
    pub async fn workflow_replaced_by(
        &self,
        id: &WorkflowId,
    ) -> ApprovalResult<Option<WorkflowId>> {
        Ok(self.store.replaced_by(id).await?)
    }

    /// Soft-delete a workflow version; it stays resolvable for history
    /// but is never picked for new requests.
    pub async fn retire_workflow(&self, id: &WorkflowId) -> ApprovalResult<()> {
        Ok(self.store.soft_delete_workflow(id, Utc::now()).await?)
    }

    // ── Documents ────────────────────────────────────────────────────

    /// Register (or re-register) a document. Rejected while a live
    /// request holds the edit lock.
    pub async fn register_document(&self, document: LinkedDocument) -> ApprovalResult<()> {
        if self.store.get_document(&document.id).await?.is_some()
            && !self.documents.is_editable(&document.id).await?
        {
            return Err(ApprovalError::Validation(format!(
                "document {} is locked by an approval request",
                document.id
            )));
        }
        Ok(self.store.upsert_document(document).await?)
    }

    /// Create a document derived from an earlier, approved one. The
    /// provenance link is preserved; approval is not — the derived
    /// document gets its own independent request when submitted.
    pub async fn derive_document(
        &self,
        source: &DocumentId,
        id: DocumentId,
        page: PageId,
        owner: UserId,
    ) -> ApprovalResult<LinkedDocument> {
        self.store
            .get_document(source)
            .await?
            .ok_or_else(|| ApprovalError::DocumentNotFound(source.clone()))?;
        let latest = self.store.latest_request_for_document(source).await?;
        if latest.map(|r| r.status) != Some(RequestStatus::Approved) {
            return Err(ApprovalError::Validation(format!(
                "source document {} is not approved",
                source
            )));
        }

        let document = LinkedDocument::new(id, page, owner).derived_from(source.clone());
        self.store.upsert_document(document.clone()).await?;
        Ok(document)
    }

    pub async fn is_document_editable(&self, id: &DocumentId) -> ApprovalResult<bool> {
        self.documents.is_editable(id).await
    }

    // ── Request lifecycle ────────────────────────────────────────────

    /// Submit a document for approval.
    pub async fn create_request(
        &self,
        page: &PageId,
        requester: UserId,
        document_id: DocumentId,
        payload: serde_json::Value,
        priority: Priority,
        due_date: Option<DateTime<Utc>>,
    ) -> ApprovalResult<RequestId> {
        self.create_request_at(page, requester, document_id, payload, priority, due_date, Utc::now())
            .await
    }

    /// Submit a document for approval, with an explicit submission time.
    ///
    /// Resolves the highest-priority current workflow for the page and
    /// pins its version onto the request; seeds pending actions for the
    /// first applicable step; locks the document.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_request_at(
        &self,
        page: &PageId,
        requester: UserId,
        document_id: DocumentId,
        payload: serde_json::Value,
        priority: Priority,
        due_date: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestId> {
        let document = self
            .store
            .get_document(&document_id)
            .await?
            .ok_or_else(|| ApprovalError::DocumentNotFound(document_id.clone()))?;
        if document.page_id != *page {
            return Err(ApprovalError::Validation(format!(
                "document {} does not belong to page '{}'",
                document_id, page
            )));
        }
        if !self.documents.is_editable(&document_id).await? {
            return Err(ApprovalError::Validation(format!(
                "document {} is already governed by a live approval request",
                document_id
            )));
        }

        let workflow = self
            .store
            .current_for_page(page)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApprovalError::NoWorkflowForPage(page.clone()))?;

        let mut request = ApprovalRequest::new(
            page.clone(),
            workflow.id.clone(),
            requester,
            document_id.clone(),
            payload,
        )
        .with_priority(priority);
        if let Some(due) = due_date {
            request = request.with_due_date(due);
        }

        // First step whose condition holds for this payload; earlier
        // steps are skipped without ever creating actions.
        let mut first = None;
        let mut order = 1;
        while order <= workflow.last_order() {
            let step = workflow
                .step_at(order)
                .ok_or_else(|| ApprovalError::StepNotFound {
                    workflow: workflow.id.clone(),
                    step: order,
                })?;
            if step.applies_to(&request.payload) {
                first = Some(step.clone());
                break;
            }
            order += 1;
        }

        let request_id = request.id.clone();
        match first {
            Some(step) => {
                request.current_step = step.step_order;
                let approvers = self.evaluator.eligible_approvers(&request, &step, at).await?;
                if approvers.is_empty() {
                    return Err(ApprovalError::Validation(format!(
                        "step {} has no eligible approvers",
                        step.step_order
                    )));
                }

                self.store.insert_request(request).await?;
                for approver in &approvers {
                    self.store
                        .insert_action(approval_types::ApprovalAction::pending(
                            request_id.clone(),
                            step.id.clone(),
                            approver.clone(),
                            at,
                        ))
                        .await?;
                }
                self.documents.lock_for_submission(&document_id, at).await?;
                self.notifications
                    .step_awaiting(&request_id, &approvers, at)
                    .await?;
                tracing::info!(
                    request_id = %request_id,
                    workflow_id = %workflow.id,
                    step = step.step_order,
                    "approval request created"
                );
            }
            None => {
                // Every step skipped by its condition: nothing to approve.
                request.approve(at);
                self.store.insert_request(request).await?;
                self.documents
                    .apply(&document_id, RequestStatus::Approved, at)
                    .await?;
                tracing::info!(
                    request_id = %request_id,
                    workflow_id = %workflow.id,
                    "approval request cleared immediately, no applicable steps"
                );
            }
        }

        Ok(request_id)
    }

    pub async fn get_request(&self, id: &RequestId) -> ApprovalResult<ApprovalRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| ApprovalError::RequestNotFound(id.clone()))
    }

    /// Record an approver's decision and recompute the request status.
    /// Attachments are opaque references to already-uploaded files.
    pub async fn process_action(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
    ) -> ApprovalResult<RequestStatus> {
        self.processor
            .process_action(request_id, actor, decision, comments, attachments, Utc::now())
            .await
    }

    /// `process_action` with an explicit decision time.
    pub async fn process_action_at(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestStatus> {
        self.processor
            .process_action(request_id, actor, decision, comments, attachments, at)
            .await
    }

    /// Whether the actor could act on the request's current step now.
    pub async fn can_actor_approve(
        &self,
        request_id: &RequestId,
        actor: &UserId,
    ) -> ApprovalResult<bool> {
        self.processor.can_act(request_id, actor, Utc::now()).await
    }

    /// The actor's inbox: pending requests where the actor holds an
    /// undecided action row.
    pub async fn pending_for_actor(
        &self,
        actor: &UserId,
    ) -> ApprovalResult<Vec<ApprovalRequest>> {
        let actions = self.store.pending_actions_for(actor).await?;
        let mut seen = HashSet::new();
        let mut inbox = Vec::new();
        for action in actions {
            if seen.contains(&action.request_id) {
                continue;
            }
            let Some(request) = self.store.get_request(&action.request_id).await? else {
                continue;
            };
            if !request.is_pending() {
                continue;
            }
            // Only rows on the *current* step count: a cleared step can
            // leave other approvers' rows pending forever.
            let Some(workflow) = self.store.get_workflow(&request.workflow_id).await? else {
                continue;
            };
            let on_current_step = workflow
                .step_at(request.current_step)
                .map(|s| s.id == action.step_id)
                .unwrap_or(false);
            if on_current_step {
                seen.insert(action.request_id.clone());
                inbox.push(request);
            }
        }
        Ok(inbox)
    }

    /// Administrative cancellation. The request must still be pending;
    /// the document is reopened for edit.
    pub async fn cancel_request(&self, request_id: &RequestId) -> ApprovalResult<()> {
        self.cancel_request_at(request_id, Utc::now()).await
    }

    pub async fn cancel_request_at(
        &self,
        request_id: &RequestId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        let request = self.get_request(request_id).await?;
        if request.is_terminal() {
            return Err(ApprovalError::AlreadyProcessed {
                request: request.id.clone(),
                status: request.status,
            });
        }

        let mut updated = request.clone();
        updated.cancel(at);
        let stored = match self.store.update_request(updated, request.revision).await {
            Ok(stored) => stored,
            Err(StorageError::Conflict(detail)) => {
                return Err(ApprovalError::ConcurrencyConflict {
                    request: request.id.clone(),
                    detail,
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.documents
            .apply(&stored.document_id, stored.status, at)
            .await?;
        tracing::info!(request_id = %stored.id, "request cancelled");
        Ok(())
    }

    // ── Delegations ──────────────────────────────────────────────────

    /// Register a delegation. Overlap with an existing active delegation
    /// for the same delegator is rejected, never tie-broken later.
    pub async fn create_delegation(
        &self,
        delegation: ApprovalDelegation,
    ) -> ApprovalResult<DelegationId> {
        delegation.validate()?;
        let id = delegation.id.clone();
        let delegator = delegation.delegator.clone();
        match self.store.insert_delegation(delegation).await {
            Ok(()) => Ok(id),
            Err(StorageError::Conflict(_)) => Err(ApprovalError::DelegationOverlap { delegator }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn revoke_delegation(&self, id: &DelegationId) -> ApprovalResult<()> {
        Ok(self.store.deactivate_delegation(id).await?)
    }

    /// Delegations in force at the given instant.
    pub async fn active_delegations(
        &self,
        at: DateTime<Utc>,
    ) -> ApprovalResult<Vec<ApprovalDelegation>> {
        self.delegations.active_delegations(at).await
    }

    /// Who should currently act for the nominal approver.
    pub async fn resolve_approver(
        &self,
        nominal: &UserId,
        page: &PageId,
        workflow: &WorkflowId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<UserId> {
        self.delegations.resolve(nominal, page, workflow, at).await
    }

    // ── Notifications ────────────────────────────────────────────────

    pub async fn mark_notification_read(
        &self,
        id: &NotificationId,
    ) -> ApprovalResult<ApprovalNotification> {
        self.notifications.mark_read(id, Utc::now()).await
    }

    pub async fn unread_notifications(
        &self,
        recipient: &UserId,
    ) -> ApprovalResult<Vec<ApprovalNotification>> {
        self.notifications.unread_for(recipient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticRoleDirectory;
    use approval_store::{ActionStore, DocumentStore, InMemoryApprovalStore};
    use approval_types::{StepCondition, WorkflowStep};
    use chrono::TimeZone;
    use serde_json::json;

    type TestEngine = ApprovalEngine<InMemoryApprovalStore>;

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn make_engine() -> TestEngine {
        make_engine_with_roles(&[])
    }

    fn make_engine_with_roles(assignments: &[(&str, &str)]) -> TestEngine {
        let directory = StaticRoleDirectory::new();
        for (role, user) in assignments {
            directory.assign(approval_types::RoleId::new(*role), UserId::new(*user));
        }
        ApprovalEngine::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(directory),
        )
    }

    async fn register_doc(engine: &TestEngine, id: &str, page: &str) {
        engine
            .register_document(LinkedDocument::new(
                DocumentId::new(id),
                PageId::new(page),
                UserId::new("requester"),
            ))
            .await
            .unwrap();
    }

    async fn submit(engine: &TestEngine, page: &str, doc: &str) -> RequestId {
        submit_payload(engine, page, doc, json!({})).await
    }

    async fn submit_payload(
        engine: &TestEngine,
        page: &str,
        doc: &str,
        payload: serde_json::Value,
    ) -> RequestId {
        engine
            .create_request(
                &PageId::new(page),
                UserId::new("requester"),
                DocumentId::new(doc),
                payload,
                Priority::Normal,
                None,
            )
            .await
            .unwrap()
    }

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    #[tokio::test]
    async fn test_single_approver_happy_path() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;

        let request_id = submit(&engine, "leave", "doc-1").await;

        // The approver's pending action exists from creation
        let inbox = engine.pending_for_actor(&user("manager")).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(engine
            .can_actor_approve(&request_id, &user("manager"))
            .await
            .unwrap());

        let status = engine
            .process_action(&request_id, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);

        let request = engine.get_request(&request_id).await.unwrap();
        assert!(request.completed_at.is_some());

        let document = engine
            .store()
            .get_document(&DocumentId::new("doc-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.status, approval_types::DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn test_two_of_two_step() {
        let engine = make_engine_with_roles(&[("finance", "ana"), ("finance", "ben")]);
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Purchase Approval")
            .with_step(
                WorkflowStep::role(1, approval_types::RoleId::new("finance"))
                    .with_required_approvals(2),
            );
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;
        let request_id = submit(&engine, "purchase", "doc-1").await;

        let status = engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Pending);
        assert_eq!(engine.get_request(&request_id).await.unwrap().current_step, 1);

        let status = engine
            .process_action(&request_id, &user("ben"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_single_rejection_vetoes() {
        let engine = make_engine_with_roles(&[("finance", "ana"), ("finance", "ben")]);
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Purchase Approval")
            .with_step(
                WorkflowStep::role(1, approval_types::RoleId::new("finance"))
                    .with_required_approvals(2),
            );
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;
        let request_id = submit(&engine, "purchase", "doc-1").await;

        engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        let status = engine
            .process_action(&request_id, &user("ben"), Decision::Rejected, Some("over budget".into()), Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Rejected);

        // Rejection re-opens the document for its owner
        assert!(engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());

        // Once terminal, any attempt at all is AlreadyProcessed
        let result = engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::AlreadyProcessed { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_decision_is_already_acted() {
        let engine = make_engine_with_roles(&[("finance", "ana"), ("finance", "ben")]);
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Purchase Approval")
            .with_step(
                WorkflowStep::role(1, approval_types::RoleId::new("finance"))
                    .with_required_approvals(2),
            );
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;
        let request_id = submit(&engine, "purchase", "doc-1").await;

        engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        let result = engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::AlreadyActed { .. })));
        assert!(!engine
            .can_actor_approve(&request_id, &user("ana"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_outsider_is_not_authorized() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;
        let request_id = submit(&engine, "leave", "doc-1").await;

        let result = engine
            .process_action(&request_id, &user("intruder"), Decision::Approved, None, Vec::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::NotAuthorized { .. })));
    }

    #[tokio::test]
    async fn test_delegate_is_authorized_inside_window() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("travel"), "Travel Approval")
            .with_step(WorkflowStep::user(1, user("dana")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "travel").await;

        // Request created before the delegation window opens
        let created_at = Utc.with_ymd_and_hms(2023, 12, 20, 9, 0, 0).unwrap();
        let request_id = engine
            .create_request_at(
                &PageId::new("travel"),
                user("requester"),
                DocumentId::new("doc-1"),
                json!({}),
                Priority::Normal,
                None,
                created_at,
            )
            .await
            .unwrap();

        engine
            .create_delegation(ApprovalDelegation::new(
                user("dana"),
                user("erik"),
                date(1),
                date(10),
            ))
            .await
            .unwrap();

        // On day 5 the delegate acts, authorized by the delegation
        let status = engine
            .process_action_at(&request_id, &user("erik"), Decision::Approved, None, Vec::new(), date(5))
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);

        // The decision is recorded under the delegate's own identity
        let actions = engine
            .store()
            .actions_for_request(&request_id)
            .await
            .unwrap();
        assert!(actions
            .iter()
            .any(|a| a.approver_id == user("erik") && a.is_approved()));
    }

    #[tokio::test]
    async fn test_multi_step_advancement_seeds_late() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Two Stage")
            .with_step(WorkflowStep::user(1, user("ana")))
            .with_step(WorkflowStep::user(2, user("ben")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;
        let request_id = submit(&engine, "purchase", "doc-1").await;

        // Second-step approver has nothing yet: actions are seeded on
        // advancement, not at request creation
        assert!(engine
            .pending_for_actor(&user("ben"))
            .await
            .unwrap()
            .is_empty());

        let status = engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Pending);

        let request = engine.get_request(&request_id).await.unwrap();
        assert_eq!(request.current_step, 2);

        let inbox = engine.pending_for_actor(&user("ben")).await.unwrap();
        assert_eq!(inbox.len(), 1);

        let status = engine
            .process_action(&request_id, &user("ben"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_workflow_version_pinning() {
        let engine = make_engine();
        let v1 = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("ana")));
        let v1_id = engine.save_workflow(v1, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;
        let request_id = submit(&engine, "leave", "doc-1").await;

        // Edit the workflow: the new version routes to a different approver
        let v2 = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("carol")));
        let v2_id = engine.save_workflow(v2, Some(v1_id.clone())).await.unwrap();

        assert_eq!(
            engine.workflow_replaced_by(&v1_id).await.unwrap(),
            Some(v2_id.clone())
        );
        let current = engine
            .workflows_for_page(&PageId::new("leave"))
            .await
            .unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, v2_id);
        assert_eq!(current[0].version, 2);

        // The in-flight request still resolves the old version's steps
        let result = engine
            .process_action(&request_id, &user("carol"), Decision::Approved, None, Vec::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::NotAuthorized { .. })));

        let status = engine
            .process_action(&request_id, &user("ana"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_conditional_step_skipped_on_advancement() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Tiered Approval")
            .with_step(WorkflowStep::user(1, user("manager")))
            .with_step(
                WorkflowStep::user(2, user("cfo"))
                    .with_condition(StepCondition::greater_than("amount", 1000.0)),
            );
        engine.save_workflow(workflow, None).await.unwrap();

        // Small amount: the CFO step is skipped entirely
        register_doc(&engine, "doc-small", "purchase").await;
        let small = submit_payload(&engine, "purchase", "doc-small", json!({"amount": 400.0})).await;
        let status = engine
            .process_action(&small, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Approved);

        // Large amount: the CFO step activates
        register_doc(&engine, "doc-large", "purchase").await;
        let large = submit_payload(&engine, "purchase", "doc-large", json!({"amount": 8000.0})).await;
        let status = engine
            .process_action(&large, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert_eq!(status, RequestStatus::Pending);
        assert_eq!(engine.get_request(&large).await.unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn test_inapplicable_first_step_skipped_at_creation() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Tiered Approval")
            .with_step(
                WorkflowStep::user(1, user("cfo"))
                    .with_condition(StepCondition::greater_than("amount", 1000.0)),
            )
            .with_step(WorkflowStep::user(2, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;

        let request_id =
            submit_payload(&engine, "purchase", "doc-1", json!({"amount": 100.0})).await;
        let request = engine.get_request(&request_id).await.unwrap();
        assert_eq!(request.current_step, 2);

        // No action was ever created for the skipped step
        assert!(engine
            .pending_for_actor(&user("cfo"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_every_step_skipped_approves_immediately() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("purchase"), "Conditional Only")
            .with_step(
                WorkflowStep::user(1, user("cfo"))
                    .with_condition(StepCondition::greater_than("amount", 1000.0)),
            );
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;

        let request_id = submit_payload(&engine, "purchase", "doc-1", json!({"amount": 5.0})).await;
        let request = engine.get_request(&request_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_highest_priority_workflow_wins() {
        let engine = make_engine();
        let low = ApprovalWorkflow::new(PageId::new("purchase"), "Fallback")
            .with_priority(1)
            .with_step(WorkflowStep::user(1, user("ana")));
        let high = ApprovalWorkflow::new(PageId::new("purchase"), "Preferred")
            .with_priority(10)
            .with_step(WorkflowStep::user(1, user("ben")));
        engine.save_workflow(low, None).await.unwrap();
        let high_id = engine.save_workflow(high, None).await.unwrap();
        register_doc(&engine, "doc-1", "purchase").await;

        let request_id = submit(&engine, "purchase", "doc-1").await;
        let request = engine.get_request(&request_id).await.unwrap();
        assert_eq!(request.workflow_id, high_id);
    }

    #[tokio::test]
    async fn test_edit_lock_through_lifecycle() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;

        assert!(engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());

        let request_id = submit(&engine, "leave", "doc-1").await;
        assert!(!engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());

        // Re-registering while locked is rejected
        let result = engine
            .register_document(LinkedDocument::new(
                DocumentId::new("doc-1"),
                PageId::new("leave"),
                user("requester"),
            ))
            .await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));

        // A second submission while governed is rejected too
        let result = engine
            .create_request(
                &PageId::new("leave"),
                user("requester"),
                DocumentId::new("doc-1"),
                json!({}),
                Priority::Normal,
                None,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));

        engine
            .process_action(&request_id, &user("manager"), Decision::Rejected, None, Vec::new())
            .await
            .unwrap();
        assert!(engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());

        // Approval locks permanently
        let request_id = submit(&engine, "leave", "doc-1").await;
        engine
            .process_action(&request_id, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        assert!(!engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancel_reopens_document() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;
        let request_id = submit(&engine, "leave", "doc-1").await;

        engine.cancel_request(&request_id).await.unwrap();

        let request = engine.get_request(&request_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);
        assert!(engine
            .is_document_editable(&DocumentId::new("doc-1"))
            .await
            .unwrap());

        let result = engine
            .process_action(&request_id, &user("manager"), Decision::Approved, None, Vec::new())
            .await;
        assert!(matches!(result, Err(ApprovalError::AlreadyProcessed { .. })));

        let result = engine.cancel_request(&request_id).await;
        assert!(matches!(result, Err(ApprovalError::AlreadyProcessed { .. })));
    }

    #[tokio::test]
    async fn test_no_workflow_for_page() {
        let engine = make_engine();
        register_doc(&engine, "doc-1", "unknown-page").await;
        let result = engine
            .create_request(
                &PageId::new("unknown-page"),
                user("requester"),
                DocumentId::new("doc-1"),
                json!({}),
                Priority::Normal,
                None,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::NoWorkflowForPage(_))));
    }

    #[tokio::test]
    async fn test_overlapping_delegation_rejected() {
        let engine = make_engine();
        engine
            .create_delegation(ApprovalDelegation::new(
                user("dana"),
                user("erik"),
                date(1),
                date(10),
            ))
            .await
            .unwrap();

        let result = engine
            .create_delegation(ApprovalDelegation::new(
                user("dana"),
                user("frank"),
                date(5),
                date(15),
            ))
            .await;
        assert!(matches!(
            result,
            Err(ApprovalError::DelegationOverlap { .. })
        ));

        assert_eq!(engine.active_delegations(date(5)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_derive_document_requires_approved_source() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("summary"), "Summary Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "summary-1", "summary").await;
        let request_id = submit(&engine, "summary", "summary-1").await;

        // Source not yet approved
        let result = engine
            .derive_document(
                &DocumentId::new("summary-1"),
                DocumentId::new("pr-1"),
                PageId::new("purchase-request"),
                user("requester"),
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));

        engine
            .process_action(&request_id, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();

        let derived = engine
            .derive_document(
                &DocumentId::new("summary-1"),
                DocumentId::new("pr-1"),
                PageId::new("purchase-request"),
                user("requester"),
            )
            .await
            .unwrap();
        assert_eq!(derived.source_document, Some(DocumentId::new("summary-1")));

        // The derived document is independent: no request yet, editable
        assert!(engine
            .is_document_editable(&DocumentId::new("pr-1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected_before_write() {
        let engine = make_engine();
        let gappy = ApprovalWorkflow::new(PageId::new("leave"), "Gappy")
            .with_step(WorkflowStep::user(1, user("a")))
            .with_step(WorkflowStep::user(3, user("b")));
        let result = engine.save_workflow(gappy, None).await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));
        assert!(engine
            .workflows_for_page(&PageId::new("leave"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_single_default_per_page_and_type() {
        let engine = make_engine();
        let first = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .as_default()
            .with_step(WorkflowStep::user(1, user("ana")));
        let first_id = engine.save_workflow(first, None).await.unwrap();

        // A second default of the same type on the same page is rejected
        let second = ApprovalWorkflow::new(PageId::new("leave"), "Competing Default")
            .as_default()
            .with_step(WorkflowStep::user(1, user("ben")));
        let result = engine.save_workflow(second, None).await;
        assert!(matches!(result, Err(ApprovalError::Validation(_))));

        // A default of a different type coexists
        let expedited = ApprovalWorkflow::new(PageId::new("leave"), "Expedited")
            .with_type("expedited")
            .as_default()
            .with_step(WorkflowStep::user(1, user("ben")));
        engine.save_workflow(expedited, None).await.unwrap();

        // Superseding the current default with a new default is fine
        let successor = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .as_default()
            .with_step(WorkflowStep::user(1, user("carol")));
        engine.save_workflow(successor, Some(first_id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_flow() {
        let engine = make_engine();
        let workflow = ApprovalWorkflow::new(PageId::new("leave"), "Leave Approval")
            .with_step(WorkflowStep::user(1, user("manager")));
        engine.save_workflow(workflow, None).await.unwrap();
        register_doc(&engine, "doc-1", "leave").await;
        let request_id = submit(&engine, "leave", "doc-1").await;

        // Creation notified the approver
        let unread = engine.unread_notifications(&user("manager")).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, approval_types::NotificationKind::NewRequest);

        let read = engine
            .mark_notification_read(&unread[0].id)
            .await
            .unwrap();
        assert!(read.is_read);
        assert!(engine
            .unread_notifications(&user("manager"))
            .await
            .unwrap()
            .is_empty());

        // Approval notifies the requester
        engine
            .process_action(&request_id, &user("manager"), Decision::Approved, None, Vec::new())
            .await
            .unwrap();
        let unread = engine
            .unread_notifications(&user("requester"))
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, approval_types::NotificationKind::Approved);
    }
}
