//! Approval workflow definitions: versioned, ordered approval step lists
//!
//! A workflow binds a document type ("page") to an ordered sequence of
//! approval steps. Definitions are immutable once registered — editing a
//! workflow registers a new version that supersedes the old one, so
//! in-flight requests keep the exact step configuration they were created
//! under.

use crate::{ApprovalError, ApprovalResult, PageId, RoleId, StepCondition, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for one version of a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow step
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// One immutable version of an approval workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    /// Unique identifier of this version
    pub id: WorkflowId,
    /// The document type this workflow governs
    pub page_id: PageId,
    /// Human-readable name
    pub name: String,
    /// Workflow category within the page (e.g. "standard", "expedited")
    pub workflow_type: String,
    /// Version number, starting at 1; successors increment it
    pub version: u32,
    /// Whether this is the default workflow for its (page, type)
    pub is_default: bool,
    /// Inactive workflows are never resolved for new requests
    pub is_active: bool,
    /// Resolution priority; highest wins when several workflows match a page
    pub priority: i32,
    /// The ordered approval steps
    pub steps: Vec<WorkflowStep>,
    /// When this version was registered
    pub created_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    /// Create a new workflow definition (version 1, no steps yet)
    pub fn new(page_id: PageId, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::generate(),
            page_id,
            name: name.into(),
            workflow_type: "standard".to_string(),
            version: 1,
            is_default: false,
            is_active: true,
            priority: 0,
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = workflow_type.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a step to the definition
    pub fn add_step(&mut self, step: WorkflowStep) {
        self.steps.push(step);
    }

    /// Get the step with the given order
    pub fn step_at(&self, order: u32) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_order == order)
    }

    /// The first step of the workflow
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.step_at(1)
    }

    /// The step immediately after the given order, if any
    pub fn step_after(&self, order: u32) -> Option<&WorkflowStep> {
        self.step_at(order + 1)
    }

    /// The highest step order in this workflow
    pub fn last_order(&self) -> u32 {
        self.steps.iter().map(|s| s.step_order).max().unwrap_or(0)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Validate the definition for structural correctness.
    ///
    /// Step orders must form a contiguous ascending sequence starting at 1,
    /// every step must require at least one approval, and escalation
    /// windows must name an escalation target.
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.steps.is_empty() {
            return Err(ApprovalError::Validation(
                "workflow must have at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_order) {
                return Err(ApprovalError::Validation(format!(
                    "duplicate step_order {}",
                    step.step_order
                )));
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            let expected = (i + 1) as u32;
            if step.step_order != expected {
                return Err(ApprovalError::Validation(format!(
                    "step_order values must be a contiguous ascending sequence starting at 1 \
                     (expected {}, found {})",
                    expected, step.step_order
                )));
            }
            if step.required_approvals < 1 {
                return Err(ApprovalError::Validation(format!(
                    "step {} requires at least one approval",
                    step.step_order
                )));
            }
            if step.escalation_after_hours.is_some() && step.escalation_to.is_none() {
                return Err(ApprovalError::Validation(format!(
                    "step {} has an escalation window but no escalation target",
                    step.step_order
                )));
            }
        }

        Ok(())
    }
}

// ── Workflow Step ────────────────────────────────────────────────────

/// One ordered stage of a workflow requiring N approvals from an
/// eligible set
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier
    pub id: StepId,
    /// Position within the workflow; 1-based, contiguous
    pub step_order: u32,
    /// Who may approve this step
    pub approver: ApproverSpec,
    /// Number of distinct approving identities needed to clear the step
    pub required_approvals: u32,
    /// Hours after activation with no decision before the step is
    /// synthetically approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_approve_after_hours: Option<u32>,
    /// Hours after activation with no decision before a fallback approver
    /// is added
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_after_hours: Option<u32>,
    /// The fallback approver added on escalation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_to: Option<UserId>,
    /// Predicate over the request payload; a step whose condition does not
    /// hold is skipped entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
}

impl WorkflowStep {
    /// Create a step with the given order and approver spec
    pub fn new(step_order: u32, approver: ApproverSpec) -> Self {
        Self {
            id: StepId::generate(),
            step_order,
            approver,
            required_approvals: 1,
            auto_approve_after_hours: None,
            escalation_after_hours: None,
            escalation_to: None,
            condition: None,
        }
    }

    /// Create a step approved by a specific user
    pub fn user(step_order: u32, user: UserId) -> Self {
        Self::new(step_order, ApproverSpec::User(user))
    }

    /// Create a step approved by members of a role
    pub fn role(step_order: u32, role: RoleId) -> Self {
        Self::new(step_order, ApproverSpec::Role(role))
    }

    pub fn with_required_approvals(mut self, count: u32) -> Self {
        self.required_approvals = count;
        self
    }

    pub fn with_auto_approve_after(mut self, hours: u32) -> Self {
        self.auto_approve_after_hours = Some(hours);
        self
    }

    pub fn with_escalation(mut self, hours: u32, to: UserId) -> Self {
        self.escalation_after_hours = Some(hours);
        self.escalation_to = Some(to);
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Whether this step applies to the given request payload
    pub fn applies_to(&self, payload: &serde_json::Value) -> bool {
        match &self.condition {
            Some(condition) => condition.evaluate(payload),
            None => true,
        }
    }
}

// ── Approver Spec ────────────────────────────────────────────────────

/// Who may act on a step: a named user, or everyone holding a role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverSpec {
    /// A single named approver
    User(UserId),
    /// All members of a role, resolved through the directory at
    /// activation time
    Role(RoleId),
}

impl ApproverSpec {
    pub fn is_role(&self) -> bool {
        matches!(self, Self::Role(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_two_step_workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(PageId::new("travel-request"), "Travel Approval")
            .with_step(WorkflowStep::user(1, UserId::new("manager")))
            .with_step(
                WorkflowStep::role(2, RoleId::new("finance"))
                    .with_required_approvals(2)
                    .with_escalation(48, UserId::new("cfo")),
            )
    }

    #[test]
    fn test_create_workflow() {
        let wf = make_two_step_workflow();
        assert_eq!(wf.version, 1);
        assert_eq!(wf.step_count(), 2);
        assert_eq!(wf.last_order(), 2);
        assert!(wf.is_active);
        assert!(!wf.is_default);
    }

    #[test]
    fn test_validate_ok() {
        assert!(make_two_step_workflow().validate().is_ok());
    }

    #[test]
    fn test_validate_empty() {
        let wf = ApprovalWorkflow::new(PageId::new("p"), "Empty");
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_validate_gap_in_orders() {
        let wf = ApprovalWorkflow::new(PageId::new("p"), "Gappy")
            .with_step(WorkflowStep::user(1, UserId::new("a")))
            .with_step(WorkflowStep::user(3, UserId::new("b")));
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_validate_duplicate_orders() {
        let wf = ApprovalWorkflow::new(PageId::new("p"), "Dup")
            .with_step(WorkflowStep::user(1, UserId::new("a")))
            .with_step(WorkflowStep::user(1, UserId::new("b")));
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_validate_not_starting_at_one() {
        let wf = ApprovalWorkflow::new(PageId::new("p"), "Offset")
            .with_step(WorkflowStep::user(2, UserId::new("a")));
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_required_approvals() {
        let wf = ApprovalWorkflow::new(PageId::new("p"), "Zero")
            .with_step(WorkflowStep::user(1, UserId::new("a")).with_required_approvals(0));
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_validate_escalation_without_target() {
        let mut step = WorkflowStep::user(1, UserId::new("a"));
        step.escalation_after_hours = Some(24);
        let wf = ApprovalWorkflow::new(PageId::new("p"), "NoTarget").with_step(step);
        assert!(matches!(wf.validate(), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_step_navigation() {
        let wf = make_two_step_workflow();
        assert_eq!(wf.first_step().unwrap().step_order, 1);
        assert_eq!(wf.step_after(1).unwrap().step_order, 2);
        assert!(wf.step_after(2).is_none());
        assert!(wf.step_at(5).is_none());
    }

    #[test]
    fn test_step_applies_without_condition() {
        let step = WorkflowStep::user(1, UserId::new("a"));
        assert!(step.applies_to(&serde_json::json!({})));
    }

    #[test]
    fn test_approver_spec() {
        assert!(ApproverSpec::Role(RoleId::new("finance")).is_role());
        assert!(!ApproverSpec::User(UserId::new("a")).is_role());
    }

    #[test]
    fn test_workflow_id() {
        let id = WorkflowId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);

        let named = WorkflowId::new("wf-1");
        assert_eq!(format!("{}", named), "wf-1");
    }
}
