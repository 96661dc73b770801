use fleetgov_policy::{PolicyError, PolicyStep};
use fleetgov_store::StoreError;
use fleetgov_types::validation::describe;
use fleetgov_types::FieldError;
use thiserror::Error;

/// Result type for governance operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Errors surfaced by governance operations.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// An authorization step failed; `step` names it
    #[error("permission denied at step {step}: {reason}")]
    PermissionDenied { step: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal transition; the caller must refresh its view of the entity
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{approver} has already approved {proposal}")]
    DuplicateApproval { proposal: String, approver: String },

    /// Promotion or activation attempted before its start time
    #[error("too early: {0}")]
    TooEarly(String),

    /// The activation transaction failed and was rolled back
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("validation failed: {}", describe(.errors))]
    ValidationFailed { errors: Vec<FieldError> },

    /// A pending proposal already targets the entity
    #[error("conflict: {0}")]
    Conflict(String),

    /// The emergency brake held the change back while it was committing
    #[error("emergency brake: {0}")]
    EmergencyBrake(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl GovernanceError {
    pub fn denied(step: PolicyStep, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            step: step.as_str().to_string(),
            reason: reason.into(),
        }
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TooEarly(_) | Self::ActivationFailed(_) | Self::EmergencyBrake(_)
        )
    }

    /// Status code an HTTP boundary should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PermissionDenied { .. } => 403,
            Self::NotFound(_) => 404,
            Self::InvalidState(_)
            | Self::DuplicateApproval { .. }
            | Self::TooEarly(_)
            | Self::ValidationFailed { .. } => 400,
            Self::Conflict(_) | Self::EmergencyBrake(_) => 409,
            Self::ActivationFailed(_) | Self::Storage(_) => 503,
        }
    }

    /// The failing authorization step, for denials.
    pub fn denied_step(&self) -> Option<&str> {
        match self {
            Self::PermissionDenied { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<PolicyError> for GovernanceError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Denied { step, reason } => Self::denied(step, reason),
            PolicyError::InvalidConfiguration { reason } => {
                Self::InvalidState(format!("policy configuration: {reason}"))
            }
        }
    }
}
