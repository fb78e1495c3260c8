//! Role resolution: expanding a role into approver identities
//!
//! Role membership lives in the organization's directory, not in this
//! engine. The resolver is a trait seam so deployments can plug in
//! their directory service; the static implementation serves tests and
//! small installations.

use approval_types::{ApprovalResult, RoleId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves a role into the identities currently holding it.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn members_of(&self, role: &RoleId) -> ApprovalResult<Vec<UserId>>;
}

/// A fixed role directory held in memory.
#[derive(Default)]
pub struct StaticRoleDirectory {
    members: RwLock<HashMap<RoleId, Vec<UserId>>>,
}

impl StaticRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a role. Duplicate assignments are absorbed.
    pub fn assign(&self, role: RoleId, user: UserId) {
        let mut guard = self.members.write().unwrap_or_else(|e| e.into_inner());
        let entry = guard.entry(role).or_default();
        if !entry.contains(&user) {
            entry.push(user);
        }
    }
}

#[async_trait]
impl RoleResolver for StaticRoleDirectory {
    async fn members_of(&self, role: &RoleId) -> ApprovalResult<Vec<UserId>> {
        let guard = self.members.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(role).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticRoleDirectory::new();
        directory.assign(RoleId::new("finance"), UserId::new("alice"));
        directory.assign(RoleId::new("finance"), UserId::new("bob"));
        directory.assign(RoleId::new("finance"), UserId::new("alice")); // duplicate

        let members = directory.members_of(&RoleId::new("finance")).await.unwrap();
        assert_eq!(members.len(), 2);

        let empty = directory.members_of(&RoleId::new("legal")).await.unwrap();
        assert!(empty.is_empty());
    }
}
