use thiserror::Error;

use crate::batch::Precondition;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A batch precondition did not hold; nothing was written
    #[error("precondition failed: {0}")]
    PreconditionFailed(Precondition),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the failure came from the backend rather than the data.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
