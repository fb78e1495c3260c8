//! Document status synchronization
//!
//! The single writer of a linked document's status once an approval
//! request exists for it. Centralizing the write here keeps the request
//! transition and the document transition in one code path, so a
//! rejection can never land on the request without re-opening the
//! document.

use approval_store::{DocumentStore, RequestStore};
use approval_types::{
    ApprovalError, ApprovalResult, DocumentId, DocumentStatus, RequestStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Propagates request outcomes onto the linked document.
pub struct DocumentStatusSynchronizer<S> {
    store: Arc<S>,
}

impl<S: DocumentStore + RequestStore> DocumentStatusSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Lock the document when its request is created.
    pub async fn lock_for_submission(
        &self,
        document: &DocumentId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.store
            .set_document_status(document, DocumentStatus::Submitted, at)
            .await?;
        tracing::debug!(document_id = %document, "document locked for approval");
        Ok(())
    }

    /// Propagate a request status onto the document. An expired request
    /// keeps the document locked until administratively resolved.
    pub async fn apply(
        &self,
        document: &DocumentId,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        let document_status = match status {
            RequestStatus::Pending | RequestStatus::Expired => DocumentStatus::Submitted,
            RequestStatus::Approved => DocumentStatus::Approved,
            RequestStatus::Rejected => DocumentStatus::Rejected,
            RequestStatus::Cancelled => DocumentStatus::Cancelled,
        };
        self.store
            .set_document_status(document, document_status, at)
            .await?;
        tracing::info!(
            document_id = %document,
            status = %document_status,
            "document status synchronized"
        );
        Ok(())
    }

    /// Edit-lock rule: the owner may edit iff no request governs the
    /// document or the most recent one ended in rejection or withdrawal.
    pub async fn is_editable(&self, document: &DocumentId) -> ApprovalResult<bool> {
        let doc = self
            .store
            .get_document(document)
            .await?
            .ok_or_else(|| ApprovalError::DocumentNotFound(document.clone()))?;
        let latest = self.store.latest_request_for_document(document).await?;
        Ok(doc.is_editable_given(latest.map(|r| r.status)))
    }
}
