//! Action processing: the state machine core
//!
//! Every decision — human or synthetic — lands here. The processor
//! validates authority, records the decision on the actor's action row
//! (an atomic pending-to-decided transition), then recomputes the step
//! verdict from the full action set and writes the request transition
//! under an optimistic revision check. A losing writer recomputes from
//! the now-current state and retries; it never blindly reapplies.

use crate::step_evaluator::{evaluate_step, StepEvaluator, StepVerdict};
use crate::{DocumentStatusSynchronizer, NotificationTrigger, RoleResolver};
use approval_store::{ApprovalStorage, StorageError};
use approval_types::{
    ActionOrigin, ApprovalAction, ApprovalError, ApprovalRequest, ApprovalResult, ApprovalWorkflow,
    Decision, RequestId, RequestStatus, UserId, WorkflowStep,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Commit attempts before surfacing a ConcurrencyConflict to the caller.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Processes approve/reject decisions against a request's current step.
pub struct ActionProcessor<S> {
    store: Arc<S>,
    evaluator: StepEvaluator<S>,
    notifications: NotificationTrigger<S>,
    documents: DocumentStatusSynchronizer<S>,
}

impl<S: ApprovalStorage> ActionProcessor<S> {
    pub fn new(store: Arc<S>, roles: Arc<dyn RoleResolver>) -> Self {
        Self {
            evaluator: StepEvaluator::new(store.clone(), roles),
            notifications: NotificationTrigger::new(store.clone()),
            documents: DocumentStatusSynchronizer::new(store.clone()),
            store,
        }
    }

    /// Record a human approver's decision.
    ///
    /// Preconditions, each a distinct failure mode:
    /// - the request must be pending (`AlreadyProcessed`)
    /// - the actor, after delegation resolution, must be eligible for the
    ///   current step (`NotAuthorized`)
    /// - the actor must not already have decided this step (`AlreadyActed`)
    pub async fn process_action(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        decision: Decision,
        comments: Option<String>,
        attachments: Vec<String>,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestStatus> {
        let request = self.load_pending(request_id).await?;
        let workflow = self
            .store
            .get_workflow(&request.workflow_id)
            .await?
            .ok_or_else(|| ApprovalError::WorkflowNotFound(request.workflow_id.clone()))?;
        let step = workflow
            .step_at(request.current_step)
            .ok_or_else(|| ApprovalError::StepNotFound {
                workflow: workflow.id.clone(),
                step: request.current_step,
            })?
            .clone();

        let actions = self.store.actions_for_step(&request.id, &step.id).await?;

        // Eligibility: the resolved nominal set, plus anyone holding a
        // pending row on the step (escalation adds approvers that way).
        let mut eligible = self.evaluator.eligible_approvers(&request, &step, at).await?;
        for action in &actions {
            if action.is_pending() && !eligible.contains(&action.approver_id) {
                eligible.push(action.approver_id.clone());
            }
        }
        if !eligible.contains(actor) {
            return Err(ApprovalError::NotAuthorized {
                request: request.id.clone(),
                actor: actor.clone(),
                step: step.step_order,
            });
        }

        if actions
            .iter()
            .any(|a| a.approver_id == *actor && a.is_decided())
        {
            return Err(ApprovalError::AlreadyActed {
                request: request.id.clone(),
                actor: actor.clone(),
                step: step.step_order,
            });
        }

        // A delegate entering for a nominal approver has no seeded row;
        // the decision is recorded under the delegate's own identity.
        let action_id = match actions
            .iter()
            .find(|a| a.approver_id == *actor && a.is_pending())
        {
            Some(existing) => existing.id.clone(),
            None => {
                let seeded =
                    ApprovalAction::pending(request.id.clone(), step.id.clone(), actor.clone(), at);
                let id = seeded.id.clone();
                self.store.insert_action(seeded).await?;
                id
            }
        };

        match self
            .store
            .decide_action(&action_id, decision, comments, attachments, at)
            .await
        {
            Ok(_) => {}
            // Two submissions raced on the same row: exactly one wins,
            // the other is a duplicate.
            Err(StorageError::Conflict(_)) => {
                return Err(ApprovalError::AlreadyActed {
                    request: request.id.clone(),
                    actor: actor.clone(),
                    step: step.step_order,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            request_id = %request.id,
            actor = %actor,
            step = step.step_order,
            decision = ?decision,
            "approval action recorded"
        );

        self.finalize(request_id, &workflow, &step, at).await
    }

    /// Record a synthetic system decision (auto-approval). Shares the
    /// commit path of human actions; only the human-eligibility check is
    /// skipped.
    pub async fn process_system_decision(
        &self,
        request_id: &RequestId,
        decision: Decision,
        comments: Option<String>,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestStatus> {
        let request = self.load_pending(request_id).await?;
        let workflow = self
            .store
            .get_workflow(&request.workflow_id)
            .await?
            .ok_or_else(|| ApprovalError::WorkflowNotFound(request.workflow_id.clone()))?;
        let step = workflow
            .step_at(request.current_step)
            .ok_or_else(|| ApprovalError::StepNotFound {
                workflow: workflow.id.clone(),
                step: request.current_step,
            })?
            .clone();

        let actor = UserId::system();
        let actions = self.store.actions_for_step(&request.id, &step.id).await?;
        if actions
            .iter()
            .any(|a| a.approver_id == actor && a.is_decided())
        {
            return Err(ApprovalError::AlreadyActed {
                request: request.id.clone(),
                actor,
                step: step.step_order,
            });
        }

        let action = ApprovalAction::pending(request.id.clone(), step.id.clone(), actor.clone(), at)
            .with_origin(ActionOrigin::System);
        let action_id = action.id.clone();
        self.store.insert_action(action).await?;

        match self
            .store
            .decide_action(&action_id, decision, comments, Vec::new(), at)
            .await
        {
            Ok(_) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(ApprovalError::AlreadyActed {
                    request: request.id.clone(),
                    actor,
                    step: step.step_order,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            request_id = %request.id,
            step = step.step_order,
            decision = ?decision,
            "system decision recorded"
        );

        self.finalize(request_id, &workflow, &step, at).await
    }

    /// Non-mutating mirror of the `process_action` preconditions.
    pub async fn can_act(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<bool> {
        let Some(request) = self.store.get_request(request_id).await? else {
            return Ok(false);
        };
        if !request.is_pending() {
            return Ok(false);
        }
        let Some(workflow) = self.store.get_workflow(&request.workflow_id).await? else {
            return Ok(false);
        };
        let Some(step) = workflow.step_at(request.current_step) else {
            return Ok(false);
        };

        let actions = self.store.actions_for_step(&request.id, &step.id).await?;
        if actions
            .iter()
            .any(|a| a.approver_id == *actor && a.is_decided())
        {
            return Ok(false);
        }

        let mut eligible = self.evaluator.eligible_approvers(&request, step, at).await?;
        for action in &actions {
            if action.is_pending() && !eligible.contains(&action.approver_id) {
                eligible.push(action.approver_id.clone());
            }
        }
        Ok(eligible.contains(actor))
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn load_pending(&self, request_id: &RequestId) -> ApprovalResult<ApprovalRequest> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| ApprovalError::RequestNotFound(request_id.clone()))?;
        if request.is_terminal() {
            return Err(ApprovalError::AlreadyProcessed {
                request: request.id.clone(),
                status: request.status,
            });
        }
        Ok(request)
    }

    /// Recompute the step verdict from the full, current action set and
    /// write the request transition atomically. Revision conflicts are
    /// retried by recomputing from the now-current state; if another
    /// writer already completed or advanced the request, its status is
    /// returned as-is — the derivation is idempotent, never "approved
    /// then flipped back".
    async fn finalize(
        &self,
        request_id: &RequestId,
        workflow: &ApprovalWorkflow,
        step: &WorkflowStep,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestStatus> {
        let mut last_conflict = String::new();

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let fresh = self
                .store
                .get_request(request_id)
                .await?
                .ok_or_else(|| ApprovalError::RequestNotFound(request_id.clone()))?;
            if fresh.is_terminal() {
                return Ok(fresh.status);
            }
            if fresh.current_step != step.step_order {
                return Ok(fresh.status);
            }

            let actions = self.store.actions_for_step(request_id, &step.id).await?;
            match evaluate_step(&actions, step.required_approvals) {
                StepVerdict::Open => return Ok(fresh.status),

                StepVerdict::Rejected => {
                    let mut updated = fresh.clone();
                    updated.reject(at);
                    match self.store.update_request(updated, fresh.revision).await {
                        Ok(stored) => {
                            tracing::info!(request_id = %stored.id, "request rejected");
                            self.documents
                                .apply(&stored.document_id, stored.status, at)
                                .await?;
                            self.notifications.request_rejected(&stored, at).await?;
                            return Ok(stored.status);
                        }
                        Err(StorageError::Conflict(detail)) => {
                            last_conflict = detail;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                StepVerdict::Cleared => {
                    match self.advance(fresh, workflow, step.step_order, at).await {
                        Ok(status) => return Ok(status),
                        Err(ApprovalError::ConcurrencyConflict { detail, .. }) => {
                            last_conflict = detail;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Err(ApprovalError::ConcurrencyConflict {
            request: request_id.clone(),
            detail: last_conflict,
        })
    }

    /// Advance past a cleared step, skipping steps whose conditions do
    /// not hold. The next step's pending actions are seeded only now —
    /// at advancement, not at request creation. With no step left the
    /// request is approved.
    async fn advance(
        &self,
        fresh: ApprovalRequest,
        workflow: &ApprovalWorkflow,
        cleared_order: u32,
        at: DateTime<Utc>,
    ) -> ApprovalResult<RequestStatus> {
        let mut next = None;
        let mut order = cleared_order + 1;
        while order <= workflow.last_order() {
            let candidate =
                workflow
                    .step_at(order)
                    .ok_or_else(|| ApprovalError::StepNotFound {
                        workflow: workflow.id.clone(),
                        step: order,
                    })?;
            if candidate.applies_to(&fresh.payload) {
                next = Some(candidate.clone());
                break;
            }
            tracing::debug!(request_id = %fresh.id, step = order, "step skipped by condition");
            order += 1;
        }

        match next {
            Some(next_step) => {
                let approvers = self
                    .evaluator
                    .eligible_approvers(&fresh, &next_step, at)
                    .await?;
                if approvers.is_empty() {
                    return Err(ApprovalError::Validation(format!(
                        "step {} has no eligible approvers",
                        next_step.step_order
                    )));
                }

                let mut updated = fresh.clone();
                updated.advance_to(next_step.step_order, at);
                let stored = self
                    .store
                    .update_request(updated, fresh.revision)
                    .await
                    .map_err(|e| map_update_err(&fresh.id, e))?;

                // Seed after the advance wins the race, so a losing
                // concurrent writer cannot double-seed the step.
                for approver in &approvers {
                    self.store
                        .insert_action(ApprovalAction::pending(
                            stored.id.clone(),
                            next_step.id.clone(),
                            approver.clone(),
                            at,
                        ))
                        .await?;
                }
                self.notifications
                    .step_awaiting(&stored.id, &approvers, at)
                    .await?;
                tracing::info!(
                    request_id = %stored.id,
                    step = next_step.step_order,
                    "request advanced"
                );
                Ok(stored.status)
            }
            None => {
                let mut updated = fresh.clone();
                updated.approve(at);
                let stored = self
                    .store
                    .update_request(updated, fresh.revision)
                    .await
                    .map_err(|e| map_update_err(&fresh.id, e))?;
                self.documents
                    .apply(&stored.document_id, stored.status, at)
                    .await?;
                self.notifications.request_approved(&stored, at).await?;
                tracing::info!(request_id = %stored.id, "request approved");
                Ok(stored.status)
            }
        }
    }
}

fn map_update_err(request: &RequestId, err: StorageError) -> ApprovalError {
    match err {
        StorageError::Conflict(detail) => ApprovalError::ConcurrencyConflict {
            request: request.clone(),
            detail,
        },
        other => other.into(),
    }
}
