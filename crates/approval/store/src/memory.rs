//! In-memory reference implementation of the approval storage traits.
//!
//! This adapter is deterministic and test-friendly. Production
//! deployments should use a transactional backend (PostgreSQL) for
//! source-of-truth data.

use crate::traits::{
    ActionStore, DelegationStore, DocumentStore, NotificationStore, RequestStore, WorkflowStore,
};
use crate::{StorageError, StorageResult};
use approval_types::{
    ActionId, ApprovalAction, ApprovalDelegation, ApprovalNotification, ApprovalRequest,
    ApprovalWorkflow, Decision, DelegationId, DocumentId, DocumentStatus, LinkedDocument,
    NotificationId, PageId, RequestId, StepId, UserId, WorkflowId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory approval storage adapter.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    workflows: RwLock<HashMap<WorkflowId, ApprovalWorkflow>>,
    /// Succession links: superseded version → its successor. Version
    /// records themselves are never rewritten.
    succession: RwLock<HashMap<WorkflowId, WorkflowId>>,
    deleted_workflows: RwLock<HashMap<WorkflowId, DateTime<Utc>>>,
    requests: RwLock<HashMap<RequestId, ApprovalRequest>>,
    actions: RwLock<HashMap<ActionId, ApprovalAction>>,
    delegations: RwLock<HashMap<DelegationId, ApprovalDelegation>>,
    notifications: RwLock<HashMap<NotificationId, ApprovalNotification>>,
    documents: RwLock<HashMap<DocumentId, LinkedDocument>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryApprovalStore {
    async fn insert_version(
        &self,
        workflow: ApprovalWorkflow,
        supersedes: Option<WorkflowId>,
    ) -> StorageResult<()> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StorageError::Backend("workflows lock poisoned".to_string()))?;
        let mut succession = self
            .succession
            .write()
            .map_err(|_| StorageError::Backend("succession lock poisoned".to_string()))?;

        if workflows.contains_key(&workflow.id) {
            return Err(StorageError::Conflict(format!(
                "workflow version {} already exists",
                workflow.id
            )));
        }

        if let Some(old_id) = supersedes {
            if !workflows.contains_key(&old_id) {
                return Err(StorageError::NotFound(format!(
                    "superseded workflow {} not found",
                    old_id
                )));
            }
            if succession.contains_key(&old_id) {
                return Err(StorageError::Conflict(format!(
                    "workflow {} is already superseded",
                    old_id
                )));
            }
            succession.insert(old_id, workflow.id.clone());
        }

        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<ApprovalWorkflow>> {
        let guard = self
            .workflows
            .read()
            .map_err(|_| StorageError::Backend("workflows lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn current_for_page(&self, page: &PageId) -> StorageResult<Vec<ApprovalWorkflow>> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::Backend("workflows lock poisoned".to_string()))?;
        let succession = self
            .succession
            .read()
            .map_err(|_| StorageError::Backend("succession lock poisoned".to_string()))?;
        let deleted = self
            .deleted_workflows
            .read()
            .map_err(|_| StorageError::Backend("deleted lock poisoned".to_string()))?;

        let mut current: Vec<ApprovalWorkflow> = workflows
            .values()
            .filter(|w| {
                w.page_id == *page
                    && w.is_active
                    && !succession.contains_key(&w.id)
                    && !deleted.contains_key(&w.id)
            })
            .cloned()
            .collect();
        current.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.is_default.cmp(&a.is_default))
        });
        Ok(current)
    }

    async fn replaced_by(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowId>> {
        let guard = self
            .succession
            .read()
            .map_err(|_| StorageError::Backend("succession lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn soft_delete_workflow(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::Backend("workflows lock poisoned".to_string()))?;
        if !workflows.contains_key(id) {
            return Err(StorageError::NotFound(format!("workflow {} not found", id)));
        }
        drop(workflows);

        let mut deleted = self
            .deleted_workflows
            .write()
            .map_err(|_| StorageError::Backend("deleted lock poisoned".to_string()))?;
        deleted.insert(id.clone(), at);
        Ok(())
    }
}

#[async_trait]
impl RequestStore for InMemoryApprovalStore {
    async fn insert_request(&self, request: ApprovalRequest) -> StorageResult<()> {
        let mut guard = self
            .requests
            .write()
            .map_err(|_| StorageError::Backend("requests lock poisoned".to_string()))?;
        if guard.contains_key(&request.id) {
            return Err(StorageError::Conflict(format!(
                "request {} already exists",
                request.id
            )));
        }
        guard.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<ApprovalRequest>> {
        let guard = self
            .requests
            .read()
            .map_err(|_| StorageError::Backend("requests lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn update_request(
        &self,
        mut request: ApprovalRequest,
        expected_revision: u64,
    ) -> StorageResult<ApprovalRequest> {
        let mut guard = self
            .requests
            .write()
            .map_err(|_| StorageError::Backend("requests lock poisoned".to_string()))?;
        let stored = guard
            .get(&request.id)
            .ok_or_else(|| StorageError::NotFound(format!("request {} not found", request.id)))?;

        if stored.revision != expected_revision {
            return Err(StorageError::Conflict(format!(
                "request {} revision is {}, expected {}",
                request.id, stored.revision, expected_revision
            )));
        }

        request.revision = expected_revision + 1;
        guard.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn pending_requests(&self) -> StorageResult<Vec<ApprovalRequest>> {
        let guard = self
            .requests
            .read()
            .map_err(|_| StorageError::Backend("requests lock poisoned".to_string()))?;
        let mut pending: Vec<ApprovalRequest> =
            guard.values().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn latest_request_for_document(
        &self,
        document: &DocumentId,
    ) -> StorageResult<Option<ApprovalRequest>> {
        let guard = self
            .requests
            .read()
            .map_err(|_| StorageError::Backend("requests lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .filter(|r| r.document_id == *document)
            .max_by_key(|r| r.created_at)
            .cloned())
    }
}

#[async_trait]
impl ActionStore for InMemoryApprovalStore {
    async fn insert_action(&self, action: ApprovalAction) -> StorageResult<()> {
        let mut guard = self
            .actions
            .write()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        if guard.contains_key(&action.id) {
            return Err(StorageError::Conflict(format!(
                "action {} already exists",
                action.id
            )));
        }
        guard.insert(action.id.clone(), action);
        Ok(())
    }

    async fn decide_action(
        &self,
        id: &ActionId,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalAction> {
        let mut guard = self
            .actions
            .write()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("action {} not found", id)))?;

        if record.is_decided() {
            return Err(StorageError::Conflict(format!(
                "action {} already decided",
                id
            )));
        }
        record
            .decide(decision, comments, attachments, at)
            .map_err(|e| StorageError::InvariantViolation(e.to_string()))?;
        Ok(record.clone())
    }

    async fn actions_for_step(
        &self,
        request: &RequestId,
        step: &StepId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut actions: Vec<ApprovalAction> = guard
            .values()
            .filter(|a| a.request_id == *request && a.step_id == *step)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }

    async fn actions_for_request(
        &self,
        request: &RequestId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut actions: Vec<ApprovalAction> = guard
            .values()
            .filter(|a| a.request_id == *request)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }

    async fn pending_actions_for(
        &self,
        approver: &UserId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let guard = self
            .actions
            .read()
            .map_err(|_| StorageError::Backend("actions lock poisoned".to_string()))?;
        let mut actions: Vec<ApprovalAction> = guard
            .values()
            .filter(|a| a.approver_id == *approver && a.is_pending())
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }
}

#[async_trait]
impl DelegationStore for InMemoryApprovalStore {
    async fn insert_delegation(&self, delegation: ApprovalDelegation) -> StorageResult<()> {
        let mut guard = self
            .delegations
            .write()
            .map_err(|_| StorageError::Backend("delegations lock poisoned".to_string()))?;

        if let Some(existing) = guard.values().find(|d| d.overlaps(&delegation)) {
            return Err(StorageError::Conflict(format!(
                "delegation overlaps existing delegation {} for '{}'",
                existing.id, delegation.delegator
            )));
        }
        guard.insert(delegation.id.clone(), delegation);
        Ok(())
    }

    async fn delegations_active_at(
        &self,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ApprovalDelegation>> {
        let guard = self
            .delegations
            .read()
            .map_err(|_| StorageError::Backend("delegations lock poisoned".to_string()))?;
        let mut active: Vec<ApprovalDelegation> =
            guard.values().filter(|d| d.covers(at)).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn deactivate_delegation(&self, id: &DelegationId) -> StorageResult<()> {
        let mut guard = self
            .delegations
            .write()
            .map_err(|_| StorageError::Backend("delegations lock poisoned".to_string()))?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("delegation {} not found", id)))?;
        record.is_active = false;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for InMemoryApprovalStore {
    async fn append_notification(
        &self,
        notification: ApprovalNotification,
    ) -> StorageResult<()> {
        let mut guard = self
            .notifications
            .write()
            .map_err(|_| StorageError::Backend("notifications lock poisoned".to_string()))?;
        guard.insert(notification.id.clone(), notification);
        Ok(())
    }

    async fn mark_notification_read(
        &self,
        id: &NotificationId,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalNotification> {
        let mut guard = self
            .notifications
            .write()
            .map_err(|_| StorageError::Backend("notifications lock poisoned".to_string()))?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("notification {} not found", id)))?;
        record.mark_read(at);
        Ok(record.clone())
    }

    async fn unread_notifications_for(
        &self,
        recipient: &UserId,
    ) -> StorageResult<Vec<ApprovalNotification>> {
        let guard = self
            .notifications
            .read()
            .map_err(|_| StorageError::Backend("notifications lock poisoned".to_string()))?;
        let mut unread: Vec<ApprovalNotification> = guard
            .values()
            .filter(|n| n.recipient == *recipient && !n.is_read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(unread)
    }

    async fn notifications_for_request(
        &self,
        request: &RequestId,
    ) -> StorageResult<Vec<ApprovalNotification>> {
        let guard = self
            .notifications
            .read()
            .map_err(|_| StorageError::Backend("notifications lock poisoned".to_string()))?;
        let mut rows: Vec<ApprovalNotification> = guard
            .values()
            .filter(|n| n.request_id == *request)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl DocumentStore for InMemoryApprovalStore {
    async fn upsert_document(&self, document: LinkedDocument) -> StorageResult<()> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        guard.insert(document.id.clone(), document);
        Ok(())
    }

    async fn get_document(&self, id: &DocumentId) -> StorageResult<Option<LinkedDocument>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn set_document_status(
        &self,
        id: &DocumentId,
        status: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<LinkedDocument> {
        let mut guard = self
            .documents
            .write()
            .map_err(|_| StorageError::Backend("documents lock poisoned".to_string()))?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("document {} not found", id)))?;
        record.status = status;
        record.updated_at = at;
        Ok(record.clone())
    }
}
