//! External identities referenced by the approval domain
//!
//! Users, roles, and pages are owned by other systems (the directory,
//! the document catalog). We carry them as opaque identifiers and never
//! mint them ourselves — with one exception: the reserved system actor
//! used for synthetic decisions such as auto-approval.

use serde::{Deserialize, Serialize};

/// Identifier of a person who can request, approve, or delegate
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved actor that records synthetic decisions (auto-approval)
    pub fn system() -> Self {
        Self("__system__".to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == "__system__"
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a document type bound to a workflow (leave request,
/// procurement summary, purchase order, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a role in the organization's directory
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
