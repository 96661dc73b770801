//! Error types for policy evaluation

use thiserror::Error;

use crate::decision::PolicyStep;

/// Policy evaluation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy step denied the action
    #[error("Permission denied at step {step}: {reason}")]
    Denied { step: PolicyStep, reason: String },

    /// Invalid action catalog configuration
    #[error("Invalid policy configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
