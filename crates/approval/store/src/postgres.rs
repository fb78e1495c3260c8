//! PostgreSQL adapter for approval storage.
//!
//! This adapter is the transactional source-of-truth backend. The
//! optimistic paths (request revision check, pending-to-decided action
//! transition) are conditional UPDATEs checked via affected-row counts,
//! so two concurrent writers can never both win.

use crate::traits::{
    ActionStore, DelegationStore, DocumentStore, NotificationStore, RequestStore, WorkflowStore,
};
use crate::{StorageError, StorageResult};
use approval_types::{
    ActionId, ActionOrigin, ActionState, ApprovalAction, ApprovalDelegation, ApprovalNotification,
    ApprovalRequest, ApprovalWorkflow, Decision, DelegationId, DelegationScope, DocumentId,
    DocumentStatus, LinkedDocument, NotificationId, NotificationKind, PageId, Priority, RequestId,
    RequestStatus, StepId, UserId, WorkflowId, WorkflowStep,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// PostgreSQL-backed approval storage adapter.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize the required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS approval_workflows (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL,
                name TEXT NOT NULL,
                workflow_type TEXT NOT NULL,
                version INTEGER NOT NULL,
                is_default BOOLEAN NOT NULL,
                is_active BOOLEAN NOT NULL,
                priority INTEGER NOT NULL,
                steps JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_workflow_succession (
                old_id TEXT PRIMARY KEY,
                new_id TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_workflow_deletions (
                workflow_id TEXT PRIMARY KEY,
                deleted_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_requests (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                requester_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                payload JSONB NOT NULL,
                current_step INTEGER NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                due_date TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                revision BIGINT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_actions (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                approver_id TEXT NOT NULL,
                state TEXT NOT NULL,
                comments TEXT,
                attachments JSONB NOT NULL DEFAULT '[]',
                action_date TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                origin TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_delegations (
                id TEXT PRIMARY KEY,
                delegator_id TEXT NOT NULL,
                delegate_id TEXT NOT NULL,
                scope JSONB NOT NULL,
                starts_at TIMESTAMPTZ NOT NULL,
                ends_at TIMESTAMPTZ NOT NULL,
                reason TEXT,
                is_active BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_notifications (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                kind TEXT NOT NULL,
                request_id TEXT NOT NULL,
                is_read BOOLEAN NOT NULL,
                read_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_documents (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                source_document TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PostgresApprovalStore {
    async fn insert_version(
        &self,
        workflow: ApprovalWorkflow,
        supersedes: Option<WorkflowId>,
    ) -> StorageResult<()> {
        let steps_json = serde_json::to_value(&workflow.steps)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if let Some(old_id) = &supersedes {
            let exists = sqlx::query("SELECT 1 FROM approval_workflows WHERE id = $1")
                .bind(old_id.0.clone())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!(
                    "superseded workflow {} not found",
                    old_id
                )));
            }

            // The primary key on old_id makes a second supersession a
            // unique violation, never a silent overwrite.
            sqlx::query(
                "INSERT INTO approval_workflow_succession (old_id, new_id) VALUES ($1, $2)",
            )
            .bind(old_id.0.clone())
            .bind(workflow.id.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        }

        sqlx::query(
            r#"
            INSERT INTO approval_workflows
                (id, page_id, name, workflow_type, version, is_default, is_active, priority, steps, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(workflow.id.0.clone())
        .bind(workflow.page_id.0.clone())
        .bind(workflow.name.clone())
        .bind(workflow.workflow_type.clone())
        .bind(workflow.version as i32)
        .bind(workflow.is_default)
        .bind(workflow.is_active)
        .bind(workflow.priority)
        .bind(steps_json)
        .bind(workflow.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<ApprovalWorkflow>> {
        let row = sqlx::query(
            r#"
            SELECT id, page_id, name, workflow_type, version, is_default, is_active, priority, steps, created_at
              FROM approval_workflows
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(workflow_row_to_record).transpose()
    }

    async fn current_for_page(&self, page: &PageId) -> StorageResult<Vec<ApprovalWorkflow>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.page_id, w.name, w.workflow_type, w.version, w.is_default, w.is_active, w.priority, w.steps, w.created_at
              FROM approval_workflows w
             WHERE w.page_id = $1
               AND w.is_active
               AND NOT EXISTS (SELECT 1 FROM approval_workflow_succession s WHERE s.old_id = w.id)
               AND NOT EXISTS (SELECT 1 FROM approval_workflow_deletions d WHERE d.workflow_id = w.id)
             ORDER BY w.priority DESC, w.is_default DESC
            "#,
        )
        .bind(page.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(workflow_row_to_record).collect()
    }

    async fn replaced_by(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowId>> {
        let row = sqlx::query("SELECT new_id FROM approval_workflow_succession WHERE old_id = $1")
            .bind(id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(row
            .map(|r| r.try_get::<String, _>("new_id"))
            .transpose()
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(WorkflowId::new))
    }

    async fn soft_delete_workflow(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let exists = sqlx::query("SELECT 1 FROM approval_workflows WHERE id = $1")
            .bind(id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!("workflow {} not found", id)));
        }

        sqlx::query(
            r#"
            INSERT INTO approval_workflow_deletions (workflow_id, deleted_at)
            VALUES ($1, $2)
            ON CONFLICT (workflow_id) DO NOTHING
            "#,
        )
        .bind(id.0.clone())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for PostgresApprovalStore {
    async fn insert_request(&self, request: ApprovalRequest) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, page_id, workflow_id, requester_id, document_id, payload, current_step,
                 status, priority, due_date, completed_at, created_at, updated_at, revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(request.id.0.clone())
        .bind(request.page_id.0.clone())
        .bind(request.workflow_id.0.clone())
        .bind(request.requester.0.clone())
        .bind(request.document_id.0.clone())
        .bind(request.payload.clone())
        .bind(request.current_step as i32)
        .bind(request_status_to_str(request.status))
        .bind(priority_to_str(request.priority))
        .bind(request.due_date)
        .bind(request.completed_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.revision as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<ApprovalRequest>> {
        let row = sqlx::query(
            r#"
            SELECT id, page_id, workflow_id, requester_id, document_id, payload, current_step,
                   status, priority, due_date, completed_at, created_at, updated_at, revision
              FROM approval_requests
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(request_row_to_record).transpose()
    }

    async fn update_request(
        &self,
        mut request: ApprovalRequest,
        expected_revision: u64,
    ) -> StorageResult<ApprovalRequest> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
               SET current_step = $1,
                   status = $2,
                   completed_at = $3,
                   updated_at = $4,
                   revision = revision + 1
             WHERE id = $5
               AND revision = $6
            "#,
        )
        .bind(request.current_step as i32)
        .bind(request_status_to_str(request.status))
        .bind(request.completed_at)
        .bind(request.updated_at)
        .bind(request.id.0.clone())
        .bind(expected_revision as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = self.get_request(&request.id).await?.is_some();
            if exists {
                return Err(StorageError::Conflict(format!(
                    "request {} revision changed, expected {}",
                    request.id, expected_revision
                )));
            }
            return Err(StorageError::NotFound(format!(
                "request {} not found",
                request.id
            )));
        }

        request.revision = expected_revision + 1;
        Ok(request)
    }

    async fn pending_requests(&self) -> StorageResult<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT id, page_id, workflow_id, requester_id, document_id, payload, current_step,
                   status, priority, due_date, completed_at, created_at, updated_at, revision
              FROM approval_requests
             WHERE status = 'pending'
             ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(request_row_to_record).collect()
    }

    async fn latest_request_for_document(
        &self,
        document: &DocumentId,
    ) -> StorageResult<Option<ApprovalRequest>> {
        let row = sqlx::query(
            r#"
            SELECT id, page_id, workflow_id, requester_id, document_id, payload, current_step,
                   status, priority, due_date, completed_at, created_at, updated_at, revision
              FROM approval_requests
             WHERE document_id = $1
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(document.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(request_row_to_record).transpose()
    }
}

#[async_trait]
impl ActionStore for PostgresApprovalStore {
    async fn insert_action(&self, action: ApprovalAction) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_actions
                (id, request_id, step_id, approver_id, state, comments, attachments, action_date, created_at, origin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(action.id.0.clone())
        .bind(action.request_id.0.clone())
        .bind(action.step_id.0.clone())
        .bind(action.approver_id.0.clone())
        .bind(action_state_to_str(action.state))
        .bind(action.comments.clone())
        .bind(serde_json::json!(action.attachments))
        .bind(action.action_date)
        .bind(action.created_at)
        .bind(action_origin_to_str(action.origin))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn decide_action(
        &self,
        id: &ActionId,
        decision: Decision,
        comments: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalAction> {
        let state = ActionState::from(decision);
        let result = sqlx::query(
            r#"
            UPDATE approval_actions
               SET state = $1,
                   comments = $2,
                   action_date = $3
             WHERE id = $4
               AND state = 'pending'
            "#,
        )
        .bind(action_state_to_str(state))
        .bind(comments)
        .bind(at)
        .bind(id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_actions WHERE id = $1")
                .bind(id.0.clone())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if exists.is_some() {
                return Err(StorageError::Conflict(format!(
                    "action {} already decided",
                    id
                )));
            }
            return Err(StorageError::NotFound(format!("action {} not found", id)));
        }

        let row = sqlx::query(
            r#"
            SELECT id, request_id, step_id, approver_id, state, comments, attachments, action_date, created_at, origin
              FROM approval_actions
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        action_row_to_record(row)
    }

    async fn actions_for_step(
        &self,
        request: &RequestId,
        step: &StepId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, step_id, approver_id, state, comments, attachments, action_date, created_at, origin
              FROM approval_actions
             WHERE request_id = $1 AND step_id = $2
             ORDER BY created_at ASC
            "#,
        )
        .bind(request.0.clone())
        .bind(step.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(action_row_to_record).collect()
    }

    async fn actions_for_request(
        &self,
        request: &RequestId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, step_id, approver_id, state, comments, attachments, action_date, created_at, origin
              FROM approval_actions
             WHERE request_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(request.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(action_row_to_record).collect()
    }

    async fn pending_actions_for(
        &self,
        approver: &UserId,
    ) -> StorageResult<Vec<ApprovalAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, step_id, approver_id, state, comments, attachments, action_date, created_at, origin
              FROM approval_actions
             WHERE approver_id = $1 AND state = 'pending'
             ORDER BY created_at ASC
            "#,
        )
        .bind(approver.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(action_row_to_record).collect()
    }
}

#[async_trait]
impl DelegationStore for PostgresApprovalStore {
    async fn insert_delegation(&self, delegation: ApprovalDelegation) -> StorageResult<()> {
        let scope_json = serde_json::to_value(&delegation.scope)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Serialize concurrent inserts for the same delegator so the
        // overlap check cannot race.
        sqlx::query("LOCK TABLE approval_delegations IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let candidates = sqlx::query(
            r#"
            SELECT id, delegator_id, delegate_id, scope, starts_at, ends_at, reason, is_active, created_at
              FROM approval_delegations
             WHERE delegator_id = $1
               AND is_active
               AND starts_at < $2
               AND ends_at > $3
            "#,
        )
        .bind(delegation.delegator.0.clone())
        .bind(delegation.ends_at)
        .bind(delegation.starts_at)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        for row in candidates {
            let existing = delegation_row_to_record(row)?;
            if existing.overlaps(&delegation) {
                return Err(StorageError::Conflict(format!(
                    "delegation overlaps existing delegation {} for '{}'",
                    existing.id, delegation.delegator
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO approval_delegations
                (id, delegator_id, delegate_id, scope, starts_at, ends_at, reason, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(delegation.id.0.clone())
        .bind(delegation.delegator.0.clone())
        .bind(delegation.delegate.0.clone())
        .bind(scope_json)
        .bind(delegation.starts_at)
        .bind(delegation.ends_at)
        .bind(delegation.reason.clone())
        .bind(delegation.is_active)
        .bind(delegation.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delegations_active_at(
        &self,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ApprovalDelegation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, delegator_id, delegate_id, scope, starts_at, ends_at, reason, is_active, created_at
              FROM approval_delegations
             WHERE is_active
               AND starts_at <= $1
               AND ends_at > $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(delegation_row_to_record).collect()
    }

    async fn deactivate_delegation(&self, id: &DelegationId) -> StorageResult<()> {
        let result = sqlx::query("UPDATE approval_delegations SET is_active = FALSE WHERE id = $1")
            .bind(id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "delegation {} not found",
                id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresApprovalStore {
    async fn append_notification(
        &self,
        notification: ApprovalNotification,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_notifications
                (id, recipient, kind, request_id, is_read, read_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id.0.clone())
        .bind(notification.recipient.0.clone())
        .bind(notification_kind_to_str(notification.kind))
        .bind(notification.request_id.0.clone())
        .bind(notification.is_read)
        .bind(notification.read_at)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn mark_notification_read(
        &self,
        id: &NotificationId,
        at: DateTime<Utc>,
    ) -> StorageResult<ApprovalNotification> {
        sqlx::query(
            r#"
            UPDATE approval_notifications
               SET is_read = TRUE,
                   read_at = COALESCE(read_at, $1)
             WHERE id = $2
            "#,
        )
        .bind(at)
        .bind(id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let row = sqlx::query(
            r#"
            SELECT id, recipient, kind, request_id, is_read, read_at, created_at
              FROM approval_notifications
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("notification {} not found", id)))?;

        notification_row_to_record(row)
    }

    async fn unread_notifications_for(
        &self,
        recipient: &UserId,
    ) -> StorageResult<Vec<ApprovalNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient, kind, request_id, is_read, read_at, created_at
              FROM approval_notifications
             WHERE recipient = $1 AND NOT is_read
             ORDER BY created_at DESC
            "#,
        )
        .bind(recipient.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(notification_row_to_record).collect()
    }

    async fn notifications_for_request(
        &self,
        request: &RequestId,
    ) -> StorageResult<Vec<ApprovalNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient, kind, request_id, is_read, read_at, created_at
              FROM approval_notifications
             WHERE request_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(request.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(notification_row_to_record).collect()
    }
}

#[async_trait]
impl DocumentStore for PostgresApprovalStore {
    async fn upsert_document(&self, document: LinkedDocument) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_documents
                (id, page_id, owner_id, status, source_document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(document.id.0.clone())
        .bind(document.page_id.0.clone())
        .bind(document.owner.0.clone())
        .bind(document_status_to_str(document.status))
        .bind(document.source_document.as_ref().map(|d| d.0.clone()))
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_document(&self, id: &DocumentId) -> StorageResult<Option<LinkedDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, page_id, owner_id, status, source_document, created_at, updated_at
              FROM approval_documents
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(document_row_to_record).transpose()
    }

    async fn set_document_status(
        &self,
        id: &DocumentId,
        status: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<LinkedDocument> {
        let result = sqlx::query(
            r#"
            UPDATE approval_documents
               SET status = $1,
                   updated_at = $2
             WHERE id = $3
            "#,
        )
        .bind(document_status_to_str(status))
        .bind(at)
        .bind(id.0.clone())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("document {} not found", id)));
        }

        self.get_document(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("document {} not found", id)))
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

fn workflow_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ApprovalWorkflow> {
    let steps_json: serde_json::Value = row
        .try_get("steps")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let steps: Vec<WorkflowStep> = serde_json::from_value(steps_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(ApprovalWorkflow {
        id: WorkflowId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        page_id: PageId::new(
            row.try_get::<String, _>("page_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        name: row
            .try_get("name")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        workflow_type: row
            .try_get("workflow_type")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        version: row
            .try_get::<i32, _>("version")
            .map_err(|e| StorageError::Backend(e.to_string()))? as u32,
        is_default: row
            .try_get("is_default")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        is_active: row
            .try_get("is_active")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        priority: row
            .try_get("priority")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        steps,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn request_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ApprovalRequest> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let priority: String = row
        .try_get("priority")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(ApprovalRequest {
        id: RequestId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        page_id: PageId::new(
            row.try_get::<String, _>("page_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        workflow_id: WorkflowId::new(
            row.try_get::<String, _>("workflow_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        requester: UserId::new(
            row.try_get::<String, _>("requester_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        document_id: DocumentId::new(
            row.try_get::<String, _>("document_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        payload: row
            .try_get("payload")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        current_step: row
            .try_get::<i32, _>("current_step")
            .map_err(|e| StorageError::Backend(e.to_string()))? as u32,
        status: parse_request_status(&status)?,
        priority: parse_priority(&priority)?,
        due_date: row
            .try_get("due_date")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        revision: row
            .try_get::<i64, _>("revision")
            .map_err(|e| StorageError::Backend(e.to_string()))? as u64,
    })
}

fn action_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ApprovalAction> {
    let state: String = row
        .try_get("state")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let origin: String = row
        .try_get("origin")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let attachments_json: serde_json::Value = row
        .try_get("attachments")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let attachments: Vec<String> = serde_json::from_value(attachments_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(ApprovalAction {
        id: ActionId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        request_id: RequestId::new(
            row.try_get::<String, _>("request_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        step_id: StepId::new(
            row.try_get::<String, _>("step_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        approver_id: UserId::new(
            row.try_get::<String, _>("approver_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        state: parse_action_state(&state)?,
        comments: row
            .try_get("comments")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        attachments,
        action_date: row
            .try_get("action_date")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        origin: parse_action_origin(&origin)?,
    })
}

fn delegation_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ApprovalDelegation> {
    let scope_json: serde_json::Value = row
        .try_get("scope")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let scope: DelegationScope = serde_json::from_value(scope_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(ApprovalDelegation {
        id: DelegationId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        delegator: UserId::new(
            row.try_get::<String, _>("delegator_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        delegate: UserId::new(
            row.try_get::<String, _>("delegate_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        scope,
        starts_at: row
            .try_get("starts_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        ends_at: row
            .try_get("ends_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        reason: row
            .try_get("reason")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        is_active: row
            .try_get("is_active")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn notification_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ApprovalNotification> {
    let kind: String = row
        .try_get("kind")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(ApprovalNotification {
        id: NotificationId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        recipient: UserId::new(
            row.try_get::<String, _>("recipient")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        kind: parse_notification_kind(&kind)?,
        request_id: RequestId::new(
            row.try_get::<String, _>("request_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        is_read: row
            .try_get("is_read")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        read_at: row
            .try_get("read_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn document_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<LinkedDocument> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let source: Option<String> = row
        .try_get("source_document")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(LinkedDocument {
        id: DocumentId::new(
            row.try_get::<String, _>("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        page_id: PageId::new(
            row.try_get::<String, _>("page_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        owner: UserId::new(
            row.try_get::<String, _>("owner_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        status: parse_document_status(&status)?,
        source_document: source.map(DocumentId::new),
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

// ── Enum encoding ────────────────────────────────────────────────────

fn request_status_to_str(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Approved => "approved",
        RequestStatus::Rejected => "rejected",
        RequestStatus::Cancelled => "cancelled",
        RequestStatus::Expired => "expired",
    }
}

fn parse_request_status(raw: &str) -> StorageResult<RequestStatus> {
    match raw {
        "pending" => Ok(RequestStatus::Pending),
        "approved" => Ok(RequestStatus::Approved),
        "rejected" => Ok(RequestStatus::Rejected),
        "cancelled" => Ok(RequestStatus::Cancelled),
        "expired" => Ok(RequestStatus::Expired),
        _ => Err(StorageError::Serialization(format!(
            "unknown request status `{raw}`"
        ))),
    }
}

fn priority_to_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
        Priority::Urgent => "urgent",
    }
}

fn parse_priority(raw: &str) -> StorageResult<Priority> {
    match raw {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "urgent" => Ok(Priority::Urgent),
        _ => Err(StorageError::Serialization(format!(
            "unknown priority `{raw}`"
        ))),
    }
}

fn action_state_to_str(state: ActionState) -> &'static str {
    match state {
        ActionState::Pending => "pending",
        ActionState::Approved => "approved",
        ActionState::Rejected => "rejected",
    }
}

fn parse_action_state(raw: &str) -> StorageResult<ActionState> {
    match raw {
        "pending" => Ok(ActionState::Pending),
        "approved" => Ok(ActionState::Approved),
        "rejected" => Ok(ActionState::Rejected),
        _ => Err(StorageError::Serialization(format!(
            "unknown action state `{raw}`"
        ))),
    }
}

fn action_origin_to_str(origin: ActionOrigin) -> &'static str {
    match origin {
        ActionOrigin::Assignment => "assignment",
        ActionOrigin::Escalation => "escalation",
        ActionOrigin::System => "system",
    }
}

fn parse_action_origin(raw: &str) -> StorageResult<ActionOrigin> {
    match raw {
        "assignment" => Ok(ActionOrigin::Assignment),
        "escalation" => Ok(ActionOrigin::Escalation),
        "system" => Ok(ActionOrigin::System),
        _ => Err(StorageError::Serialization(format!(
            "unknown action origin `{raw}`"
        ))),
    }
}

fn notification_kind_to_str(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::NewRequest => "new_request",
        NotificationKind::Approved => "approved",
        NotificationKind::Rejected => "rejected",
        NotificationKind::Escalated => "escalated",
        NotificationKind::Reminder => "reminder",
        NotificationKind::Expired => "expired",
    }
}

fn parse_notification_kind(raw: &str) -> StorageResult<NotificationKind> {
    match raw {
        "new_request" => Ok(NotificationKind::NewRequest),
        "approved" => Ok(NotificationKind::Approved),
        "rejected" => Ok(NotificationKind::Rejected),
        "escalated" => Ok(NotificationKind::Escalated),
        "reminder" => Ok(NotificationKind::Reminder),
        "expired" => Ok(NotificationKind::Expired),
        _ => Err(StorageError::Serialization(format!(
            "unknown notification kind `{raw}`"
        ))),
    }
}

fn document_status_to_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Draft => "draft",
        DocumentStatus::Submitted => "submitted",
        DocumentStatus::Approved => "approved",
        DocumentStatus::Rejected => "rejected",
        DocumentStatus::Cancelled => "cancelled",
    }
}

fn parse_document_status(raw: &str) -> StorageResult<DocumentStatus> {
    match raw {
        "draft" => Ok(DocumentStatus::Draft),
        "submitted" => Ok(DocumentStatus::Submitted),
        "approved" => Ok(DocumentStatus::Approved),
        "rejected" => Ok(DocumentStatus::Rejected),
        "cancelled" => Ok(DocumentStatus::Cancelled),
        _ => Err(StorageError::Serialization(format!(
            "unknown document status `{raw}`"
        ))),
    }
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}
