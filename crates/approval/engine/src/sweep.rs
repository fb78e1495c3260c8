//! Time-triggered transitions: auto-approval, escalation, expiry,
//! reminders
//!
//! An external scheduler calls `run_sweep` periodically. The sweep only
//! detects; every state change it applies goes through the same atomic
//! action-processor path used for human decisions — there is no second,
//! weaker write path.

use crate::step_evaluator::{auto_approve_due, escalation_due};
use crate::ApprovalEngine;
use approval_store::{ApprovalStorage, StorageError};
use approval_types::{
    ActionOrigin, ApprovalAction, ApprovalRequest, ApprovalResult, Decision, RequestId, UserId,
};
use chrono::{DateTime, Duration, Utc};

/// How close a due date has to be before reminders go out.
pub const REMINDER_WINDOW_HOURS: i64 = 24;

/// What one sweep pass applied.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub auto_approved: Vec<RequestId>,
    pub escalated: Vec<(RequestId, UserId)>,
    pub expired: Vec<RequestId>,
    pub reminders_sent: usize,
}

impl<S: ApprovalStorage> ApprovalEngine<S> {
    /// Evaluate every pending request against the clock: expiry first,
    /// then auto-approval, then escalation, then reminders. A request
    /// that races with a concurrent decision is simply left for the next
    /// pass — the optimistic checks make the sweep safe to re-run.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> ApprovalResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        for request in self.store().pending_requests().await? {
            let Some(workflow) = self.store().get_workflow(&request.workflow_id).await? else {
                tracing::warn!(
                    request_id = %request.id,
                    workflow_id = %request.workflow_id,
                    "pending request references unknown workflow"
                );
                continue;
            };
            let Some(step) = workflow.step_at(request.current_step) else {
                continue;
            };
            let actions = self.store().actions_for_step(&request.id, &step.id).await?;

            if request.is_overdue(now) {
                if self.expire_request(&request, &actions, now).await? {
                    outcome.expired.push(request.id.clone());
                }
                continue;
            }

            if auto_approve_due(step, &actions, now) {
                match self
                    .processor()
                    .process_system_decision(
                        &request.id,
                        Decision::Approved,
                        Some("auto-approved: decision window elapsed".to_string()),
                        now,
                    )
                    .await
                {
                    Ok(_) => outcome.auto_approved.push(request.id.clone()),
                    Err(e) => {
                        tracing::warn!(request_id = %request.id, error = %e, "auto-approval failed")
                    }
                }
                continue;
            }

            if escalation_due(step, &actions, now) {
                let Some(target) = step.escalation_to.clone() else {
                    continue;
                };
                // The fallback approver is added to the pool; the
                // original approvers stay eligible for the life of the
                // step and their later decisions still count.
                let resolved = self
                    .delegation_resolver()
                    .resolve(&target, &request.page_id, &request.workflow_id, now)
                    .await?;
                self.store()
                    .insert_action(
                        ApprovalAction::pending(
                            request.id.clone(),
                            step.id.clone(),
                            resolved.clone(),
                            now,
                        )
                        .with_origin(ActionOrigin::Escalation),
                    )
                    .await?;
                self.notifier().escalated(&request.id, &resolved, now).await?;
                tracing::info!(
                    request_id = %request.id,
                    step = step.step_order,
                    escalated_to = %resolved,
                    "step escalated"
                );
                outcome.escalated.push((request.id.clone(), resolved));
                continue;
            }

            if request.is_due_within(now, Duration::hours(REMINDER_WINDOW_HOURS)) {
                for action in actions.iter().filter(|a| a.is_pending()) {
                    if !self
                        .notifier()
                        .has_unread_reminder(&request.id, &action.approver_id)
                        .await?
                    {
                        self.notifier()
                            .reminder(&request.id, &action.approver_id, now)
                            .await?;
                        outcome.reminders_sent += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Expire an overdue request. Returns false when a concurrent
    /// decision won the race; the next sweep re-evaluates from the new
    /// state.
    async fn expire_request(
        &self,
        request: &ApprovalRequest,
        actions: &[ApprovalAction],
        now: DateTime<Utc>,
    ) -> ApprovalResult<bool> {
        let mut updated = request.clone();
        updated.expire(now);
        match self.store().update_request(updated, request.revision).await {
            Ok(stored) => {
                self.document_sync()
                    .apply(&stored.document_id, stored.status, now)
                    .await?;
                let undecided: Vec<UserId> = actions
                    .iter()
                    .filter(|a| a.is_pending())
                    .map(|a| a.approver_id.clone())
                    .collect();
                self.notifier()
                    .request_expired(&stored, &undecided, now)
                    .await?;
                tracing::info!(request_id = %stored.id, "request expired");
                Ok(true)
            }
            Err(StorageError::Conflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
