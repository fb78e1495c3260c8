use approval_types::ApprovalError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// An optimistic check failed: revision mismatch, an already-decided
    /// action, or an overlapping delegation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for ApprovalError {
    fn from(err: StorageError) -> Self {
        ApprovalError::Storage(err.to_string())
    }
}
