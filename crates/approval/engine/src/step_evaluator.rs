//! Step evaluation: eligibility, skip conditions, and the step verdict
//!
//! The verdict is a pure function of the full action set recorded for a
//! step. It is recomputed from current state on every call — never from
//! a cached partial view — so deriving it twice from the same history
//! always yields the same answer.

use crate::{DelegationResolver, RoleResolver};
use approval_store::ApprovalStorage;
use approval_types::{
    ActionOrigin, ApprovalAction, ApprovalRequest, ApproverSpec, ApprovalResult, UserId,
    WorkflowStep,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

// ── Step verdict ─────────────────────────────────────────────────────

/// Outcome of evaluating a step's action set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepVerdict {
    /// Not enough approvals yet, and no rejection
    Open,
    /// Enough distinct identities approved
    Cleared,
    /// At least one action was rejected — a single rejection vetoes the
    /// step regardless of how many approvals exist alongside it
    Rejected,
}

/// Compute the verdict for a step from its full action set.
pub fn evaluate_step(actions: &[ApprovalAction], required_approvals: u32) -> StepVerdict {
    if actions.iter().any(|a| a.is_rejected()) {
        return StepVerdict::Rejected;
    }
    let approved: HashSet<&UserId> = actions
        .iter()
        .filter(|a| a.is_approved())
        .map(|a| &a.approver_id)
        .collect();
    if approved.len() as u32 >= required_approvals {
        StepVerdict::Cleared
    } else {
        StepVerdict::Open
    }
}

/// Whether the step's auto-approve window has elapsed with no decision.
///
/// The window is measured from step activation (the earliest seeded
/// action row). Any recorded decision disarms it.
pub fn auto_approve_due(
    step: &WorkflowStep,
    actions: &[ApprovalAction],
    now: DateTime<Utc>,
) -> bool {
    let Some(hours) = step.auto_approve_after_hours else {
        return false;
    };
    if actions.iter().any(|a| a.is_decided()) {
        return false;
    }
    let Some(activated_at) = actions.iter().map(|a| a.created_at).min() else {
        return false;
    };
    now - activated_at >= Duration::hours(hours as i64)
}

/// Whether the step's escalation window has elapsed with the step still
/// open and no escalation applied yet.
pub fn escalation_due(
    step: &WorkflowStep,
    actions: &[ApprovalAction],
    now: DateTime<Utc>,
) -> bool {
    let Some(hours) = step.escalation_after_hours else {
        return false;
    };
    if step.escalation_to.is_none() {
        return false;
    }
    if evaluate_step(actions, step.required_approvals) != StepVerdict::Open {
        return false;
    }
    if actions.iter().any(|a| a.origin == ActionOrigin::Escalation) {
        return false;
    }
    let Some(activated_at) = actions.iter().map(|a| a.created_at).min() else {
        return false;
    };
    now - activated_at >= Duration::hours(hours as i64)
}

// ── Step Evaluator ───────────────────────────────────────────────────

/// Resolves the identities entitled to act on a step.
pub struct StepEvaluator<S> {
    roles: Arc<dyn RoleResolver>,
    delegations: DelegationResolver<S>,
}

impl<S: ApprovalStorage> StepEvaluator<S> {
    pub fn new(store: Arc<S>, roles: Arc<dyn RoleResolver>) -> Self {
        Self {
            roles,
            delegations: DelegationResolver::new(store),
        }
    }

    /// The approver identities named by the step, before delegation.
    pub async fn nominal_approvers(&self, step: &WorkflowStep) -> ApprovalResult<Vec<UserId>> {
        match &step.approver {
            ApproverSpec::User(user) => Ok(vec![user.clone()]),
            ApproverSpec::Role(role) => {
                let mut members = self.roles.members_of(role).await?;
                members.sort_by(|a, b| a.0.cmp(&b.0));
                members.dedup();
                Ok(members)
            }
        }
    }

    /// The identities entitled to act on the step at `at`: the nominal
    /// set mapped through delegation resolution. A delegated-away
    /// approver is replaced by their delegate for the duration of the
    /// delegation window.
    pub async fn eligible_approvers(
        &self,
        request: &ApprovalRequest,
        step: &WorkflowStep,
        at: DateTime<Utc>,
    ) -> ApprovalResult<Vec<UserId>> {
        let nominal = self.nominal_approvers(step).await?;
        let mut eligible = Vec::with_capacity(nominal.len());
        for user in nominal {
            let resolved = self
                .delegations
                .resolve(&user, &request.page_id, &request.workflow_id, at)
                .await?;
            if !eligible.contains(&resolved) {
                eligible.push(resolved);
            }
        }
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{ActionState, Decision, RequestId, StepId};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn action(approver: &str, state: ActionState) -> ApprovalAction {
        let mut a = ApprovalAction::pending(
            RequestId::new("req-1"),
            StepId::new("step-1"),
            UserId::new(approver),
            t0(),
        );
        match state {
            ActionState::Pending => {}
            ActionState::Approved => a.decide(Decision::Approved, None, Vec::new(), t0()).unwrap(),
            ActionState::Rejected => a.decide(Decision::Rejected, None, Vec::new(), t0()).unwrap(),
        }
        a
    }

    #[test]
    fn test_open_until_enough_approvals() {
        let actions = vec![
            action("a", ActionState::Approved),
            action("b", ActionState::Pending),
        ];
        assert_eq!(evaluate_step(&actions, 2), StepVerdict::Open);
        assert_eq!(evaluate_step(&actions, 1), StepVerdict::Cleared);
    }

    #[test]
    fn test_single_rejection_vetoes() {
        let actions = vec![
            action("a", ActionState::Approved),
            action("b", ActionState::Approved),
            action("c", ActionState::Rejected),
        ];
        // Two approvals cannot outvote one rejection
        assert_eq!(evaluate_step(&actions, 2), StepVerdict::Rejected);
        assert_eq!(evaluate_step(&actions, 1), StepVerdict::Rejected);
    }

    #[test]
    fn test_distinct_approvers_counted_once() {
        let actions = vec![
            action("a", ActionState::Approved),
            action("a", ActionState::Approved),
        ];
        assert_eq!(evaluate_step(&actions, 2), StepVerdict::Open);
    }

    #[test]
    fn test_empty_action_set_is_open() {
        assert_eq!(evaluate_step(&[], 1), StepVerdict::Open);
    }

    #[test]
    fn test_auto_approve_window() {
        let step = WorkflowStep::user(1, UserId::new("a")).with_auto_approve_after(24);
        let actions = vec![action("a", ActionState::Pending)];

        assert!(!auto_approve_due(&step, &actions, t0() + Duration::hours(23)));
        assert!(auto_approve_due(&step, &actions, t0() + Duration::hours(24)));

        // A recorded decision disarms the window
        let decided = vec![action("a", ActionState::Approved)];
        assert!(!auto_approve_due(&step, &decided, t0() + Duration::hours(48)));

        // No window configured
        let plain = WorkflowStep::user(1, UserId::new("a"));
        assert!(!auto_approve_due(&plain, &actions, t0() + Duration::hours(48)));
    }

    #[test]
    fn test_escalation_window() {
        let step = WorkflowStep::user(1, UserId::new("a"))
            .with_required_approvals(2)
            .with_escalation(12, UserId::new("chief"));
        let actions = vec![
            action("a", ActionState::Approved),
            action("b", ActionState::Pending),
        ];

        assert!(!escalation_due(&step, &actions, t0() + Duration::hours(11)));
        assert!(escalation_due(&step, &actions, t0() + Duration::hours(12)));

        // Already escalated once: never again for this step
        let mut escalated = actions.clone();
        escalated.push(action("chief", ActionState::Pending).with_origin(ActionOrigin::Escalation));
        assert!(!escalation_due(&step, &escalated, t0() + Duration::hours(48)));

        // A rejected step never escalates
        let rejected = vec![action("a", ActionState::Rejected)];
        assert!(!escalation_due(&step, &rejected, t0() + Duration::hours(48)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_action() -> impl Strategy<Value = ApprovalAction> {
            ("[a-f]", 0u8..3).prop_map(|(approver, state)| {
                let state = match state {
                    0 => ActionState::Pending,
                    1 => ActionState::Approved,
                    _ => ActionState::Rejected,
                };
                action(&approver, state)
            })
        }

        proptest! {
            /// Deriving the verdict twice from the same history yields the
            /// same result.
            #[test]
            fn derivation_is_idempotent(
                actions in prop::collection::vec(arb_action(), 0..12),
                required in 1u32..5,
            ) {
                let first = evaluate_step(&actions, required);
                let second = evaluate_step(&actions, required);
                prop_assert_eq!(first, second);
            }

            /// Any history containing a rejection resolves to Rejected, no
            /// matter how many approvals sit alongside it.
            #[test]
            fn rejection_always_vetoes(
                actions in prop::collection::vec(arb_action(), 0..12),
                required in 1u32..5,
            ) {
                let mut actions = actions;
                actions.push(action("z", ActionState::Rejected));
                prop_assert_eq!(evaluate_step(&actions, required), StepVerdict::Rejected);
            }

            /// The verdict does not depend on action order.
            #[test]
            fn verdict_is_order_independent(
                actions in prop::collection::vec(arb_action(), 0..12),
                required in 1u32..5,
            ) {
                let forward = evaluate_step(&actions, required);
                let mut reversed = actions;
                reversed.reverse();
                prop_assert_eq!(forward, evaluate_step(&reversed, required));
            }
        }
    }
}
