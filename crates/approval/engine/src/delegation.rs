//! Delegation resolution: who should currently act for an approver
//!
//! A pure lookup over the delegation store — no side effects, safe to
//! call repeatedly and concurrently. Because overlapping delegations are
//! rejected on insert, at most one delegation can match a (delegator,
//! request, instant) triple; resolution never has to tie-break.
//!
//! Resolution is a single hop: a delegate's own delegations are not
//! chained.

use approval_types::{ApprovalDelegation, ApprovalResult, PageId, UserId, WorkflowId};
use approval_store::DelegationStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Maps a nominal approver to the identity that should currently act.
pub struct DelegationResolver<S> {
    store: Arc<S>,
}

impl<S: DelegationStore> DelegationResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Return the delegate if an active delegation for `nominal` covers
    /// `at` and matches the request's page/workflow scope; otherwise the
    /// nominal approver.
    pub async fn resolve(
        &self,
        nominal: &UserId,
        page: &PageId,
        workflow: &WorkflowId,
        at: DateTime<Utc>,
    ) -> ApprovalResult<UserId> {
        let active = self.store.delegations_active_at(at).await?;
        Ok(active
            .into_iter()
            .find(|d| d.delegator == *nominal && d.scope.covers(page, workflow))
            .map(|d| d.delegate)
            .unwrap_or_else(|| nominal.clone()))
    }

    /// All delegations in force at the given instant.
    pub async fn active_delegations(
        &self,
        at: DateTime<Utc>,
    ) -> ApprovalResult<Vec<ApprovalDelegation>> {
        Ok(self.store.delegations_active_at(at).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_store::InMemoryApprovalStore;
    use approval_types::DelegationScope;
    use chrono::TimeZone;

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    async fn make_resolver() -> DelegationResolver<InMemoryApprovalStore> {
        let store = Arc::new(InMemoryApprovalStore::new());
        store
            .insert_delegation(ApprovalDelegation::new(
                UserId::new("dana"),
                UserId::new("erik"),
                date(1),
                date(10),
            ))
            .await
            .unwrap();
        DelegationResolver::new(store)
    }

    #[tokio::test]
    async fn test_resolves_to_delegate_inside_window() {
        let resolver = make_resolver().await;
        let resolved = resolver
            .resolve(
                &UserId::new("dana"),
                &PageId::new("travel"),
                &WorkflowId::new("wf-1"),
                date(5),
            )
            .await
            .unwrap();
        assert_eq!(resolved, UserId::new("erik"));
    }

    #[tokio::test]
    async fn test_resolves_to_nominal_outside_window() {
        let resolver = make_resolver().await;
        let resolved = resolver
            .resolve(
                &UserId::new("dana"),
                &PageId::new("travel"),
                &WorkflowId::new("wf-1"),
                date(10), // half-open end
            )
            .await
            .unwrap();
        assert_eq!(resolved, UserId::new("dana"));
    }

    #[tokio::test]
    async fn test_scope_mismatch_resolves_to_nominal() {
        let store = Arc::new(InMemoryApprovalStore::new());
        store
            .insert_delegation(
                ApprovalDelegation::new(
                    UserId::new("dana"),
                    UserId::new("erik"),
                    date(1),
                    date(10),
                )
                .with_scope(DelegationScope::Page(PageId::new("leave"))),
            )
            .await
            .unwrap();
        let resolver = DelegationResolver::new(store);

        let resolved = resolver
            .resolve(
                &UserId::new("dana"),
                &PageId::new("travel"),
                &WorkflowId::new("wf-1"),
                date(5),
            )
            .await
            .unwrap();
        assert_eq!(resolved, UserId::new("dana"));
    }

    #[tokio::test]
    async fn test_no_chaining() {
        let store = Arc::new(InMemoryApprovalStore::new());
        store
            .insert_delegation(ApprovalDelegation::new(
                UserId::new("dana"),
                UserId::new("erik"),
                date(1),
                date(10),
            ))
            .await
            .unwrap();
        store
            .insert_delegation(ApprovalDelegation::new(
                UserId::new("erik"),
                UserId::new("frank"),
                date(1),
                date(10),
            ))
            .await
            .unwrap();
        let resolver = DelegationResolver::new(store);

        // dana resolves to erik, not through erik to frank
        let resolved = resolver
            .resolve(
                &UserId::new("dana"),
                &PageId::new("travel"),
                &WorkflowId::new("wf-1"),
                date(5),
            )
            .await
            .unwrap();
        assert_eq!(resolved, UserId::new("erik"));
    }
}
