//! Approval actions: one approver's decision on one step
//!
//! An action row is created in `pending` state when a step becomes
//! active for an approver, and transitions exactly once to approved or
//! rejected. It is otherwise immutable. A step may carry several rows —
//! one per required approver — and clears when enough are approved.

use crate::{ApprovalError, ApprovalResult, RequestId, StepId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for an approval action
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Decision & State ─────────────────────────────────────────────────

/// The decision an approver submits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// State of an action row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Waiting for the approver's decision
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl From<Decision> for ActionState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => Self::Approved,
            Decision::Rejected => Self::Rejected,
        }
    }
}

/// How the action row came to exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    /// Seeded when the step became active
    #[default]
    Assignment,
    /// Added by the escalation sweep
    Escalation,
    /// Recorded by the system actor (auto-approval)
    System,
}

// ── Approval Action ──────────────────────────────────────────────────

/// One approver's decision on one step of one request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalAction {
    /// Unique identifier
    pub id: ActionId,
    pub request_id: RequestId,
    pub step_id: StepId,
    /// The identity the decision is recorded under. A delegate acts
    /// under their own identity, authorized by the delegation relation.
    pub approver_id: UserId,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Opaque references to supporting files attached at decision time.
    /// Upload and storage of the files themselves live outside this
    /// engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// When the decision was recorded (unset while pending)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub origin: ActionOrigin,
}

impl ApprovalAction {
    /// Seed a pending action for an approver on an active step
    pub fn pending(
        request_id: RequestId,
        step_id: StepId,
        approver_id: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            request_id,
            step_id,
            approver_id,
            state: ActionState::Pending,
            comments: None,
            attachments: Vec::new(),
            action_date: None,
            created_at: at,
            origin: ActionOrigin::Assignment,
        }
    }

    pub fn with_origin(mut self, origin: ActionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Record the decision. An action transitions exactly once; deciding
    /// a decided action is an error.
    pub fn decide(
        &mut self,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
        at: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        if self.state != ActionState::Pending {
            return Err(ApprovalError::Validation(format!(
                "action {} already decided",
                self.id
            )));
        }
        self.state = decision.into();
        self.comments = comments;
        self.attachments = attachments;
        self.action_date = Some(at);
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.state == ActionState::Pending
    }

    pub fn is_decided(&self) -> bool {
        self.state != ActionState::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.state == ActionState::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.state == ActionState::Rejected
    }
}
