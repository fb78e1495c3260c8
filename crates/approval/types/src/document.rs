//! Linked documents: the business records gated by approval
//!
//! A linked document (draft, summary request, purchase request, purchase
//! order, goods-receipt note) owns a status field. Once an approval
//! request exists for the document, the status synchronizer is its only
//! writer; before that, the owner may mutate freely.

use crate::{PageId, RequestStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a linked document
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a linked document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Owned and editable by its author; no governing request yet
    #[default]
    Draft,
    /// Under approval; read-only to its owner
    Submitted,
    /// Approval completed; permanently locked
    Approved,
    /// Approval rejected; reopened for edit
    Rejected,
    /// Request withdrawn; reopened for edit
    Cancelled,
}

impl DocumentStatus {
    /// Whether the owner is locked out of editing
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Submitted | Self::Approved)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// The business record whose lifecycle is gated by an approval request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub id: DocumentId,
    pub page_id: PageId,
    pub owner: UserId,
    pub status: DocumentStatus,
    /// Provenance: the earlier approved document this one was derived
    /// from (e.g. a purchase request derived from a summary request).
    /// Derivation never transfers approval — the derived document gets
    /// its own independent request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_document: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkedDocument {
    pub fn new(id: DocumentId, page_id: PageId, owner: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            page_id,
            owner,
            status: DocumentStatus::Draft,
            source_document: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn derived_from(mut self, source: DocumentId) -> Self {
        self.source_document = Some(source);
        self
    }

    /// Edit-lock rule: the owner may edit iff no request governs the
    /// document, or the most recent one ended in rejection or withdrawal.
    pub fn is_editable_given(&self, latest_request: Option<RequestStatus>) -> bool {
        match latest_request {
            None => true,
            Some(RequestStatus::Rejected) | Some(RequestStatus::Cancelled) => true,
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_document() -> LinkedDocument {
        LinkedDocument::new(
            DocumentId::new("doc-1"),
            PageId::new("purchase-request"),
            UserId::new("alice"),
        )
    }

    #[test]
    fn test_new_document_is_draft() {
        let doc = make_document();
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert!(!doc.status.is_locked());
        assert!(doc.source_document.is_none());
    }

    #[test]
    fn test_locked_statuses() {
        assert!(DocumentStatus::Submitted.is_locked());
        assert!(DocumentStatus::Approved.is_locked());
        assert!(!DocumentStatus::Draft.is_locked());
        assert!(!DocumentStatus::Rejected.is_locked());
        assert!(!DocumentStatus::Cancelled.is_locked());
    }

    #[test]
    fn test_edit_lock_matrix() {
        let doc = make_document();

        assert!(doc.is_editable_given(None));
        assert!(doc.is_editable_given(Some(RequestStatus::Rejected)));
        assert!(doc.is_editable_given(Some(RequestStatus::Cancelled)));
        assert!(!doc.is_editable_given(Some(RequestStatus::Pending)));
        assert!(!doc.is_editable_given(Some(RequestStatus::Approved)));
        assert!(!doc.is_editable_given(Some(RequestStatus::Expired)));
    }

    #[test]
    fn test_provenance_link() {
        let derived = make_document().derived_from(DocumentId::new("summary-7"));
        assert_eq!(
            derived.source_document,
            Some(DocumentId::new("summary-7"))
        );
        // Provenance alone never approves the derived document
        assert_eq!(derived.status, DocumentStatus::Draft);
    }
}
