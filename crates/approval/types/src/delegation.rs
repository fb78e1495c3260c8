//! Approval delegations: time-bounded substitution of approvers
//!
//! A delegation says "while I am away, this person acts for me". It is
//! an advisory substitution: the delegate records decisions under their
//! own identity, authorized by the delegation holding at decision time.
//! Overlapping delegations for one delegator are rejected on insert —
//! resolution must never have to tie-break.

use crate::{ApprovalError, ApprovalResult, PageId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a delegation
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationId(pub String);

impl DelegationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DelegationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Scope ────────────────────────────────────────────────────────────

/// What a delegation covers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DelegationScope {
    /// Every page and workflow
    #[default]
    Any,
    /// Only requests on this page
    Page(PageId),
    /// Only requests bound to this workflow version
    Workflow(WorkflowId),
}

impl DelegationScope {
    /// Whether the scope covers a request on the given page/workflow
    pub fn covers(&self, page: &PageId, workflow: &WorkflowId) -> bool {
        match self {
            Self::Any => true,
            Self::Page(p) => p == page,
            Self::Workflow(w) => w == workflow,
        }
    }

    /// Whether two scopes can cover the same request. Page and Workflow
    /// scopes are treated as intersecting — a workflow belongs to some
    /// page, and the scope record alone cannot prove they differ.
    pub fn intersects(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Page(a), Self::Page(b)) => a == b,
            (Self::Workflow(a), Self::Workflow(b)) => a == b,
            (Self::Page(_), Self::Workflow(_)) | (Self::Workflow(_), Self::Page(_)) => true,
        }
    }
}

// ── Approval Delegation ──────────────────────────────────────────────

/// A time-bounded substitution: `delegator` is replaced by `delegate`
/// over the half-open window `[starts_at, ends_at)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalDelegation {
    /// Unique identifier
    pub id: DelegationId,
    pub delegator: UserId,
    pub delegate: UserId,
    pub scope: DelegationScope,
    pub starts_at: DateTime<Utc>,
    /// Exclusive end of the delegation window
    pub ends_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Revoked delegations stay on record but never resolve
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalDelegation {
    pub fn new(
        delegator: UserId,
        delegate: UserId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DelegationId::generate(),
            delegator,
            delegate,
            scope: DelegationScope::Any,
            starts_at,
            ends_at,
            reason: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_scope(mut self, scope: DelegationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether this delegation is in force at the given instant
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= at && at < self.ends_at
    }

    /// Whether two delegations for the same delegator could both resolve
    /// for some request at some instant
    pub fn overlaps(&self, other: &Self) -> bool {
        self.delegator == other.delegator
            && self.is_active
            && other.is_active
            && self.scope.intersects(&other.scope)
            && self.starts_at < other.ends_at
            && other.starts_at < self.ends_at
    }

    pub fn validate(&self) -> ApprovalResult<()> {
        if self.ends_at <= self.starts_at {
            return Err(ApprovalError::Validation(
                "delegation window must end after it starts".into(),
            ));
        }
        if self.delegator == self.delegate {
            return Err(ApprovalError::Validation(
                "cannot delegate to oneself".into(),
            ));
        }
        Ok(())
    }
}
