//! Fleet governance authorization.
//!
//! A five-step RBAC/ABAC pipeline evaluated strictly in order:
//!
//! 1. **rbac**: the action must be in the user's permission set
//! 2. **regional**: a targeted region must be in the user's allowed regions
//! 3. **sensitivity**: PII and unmask actions need a completed step-up verification
//! 4. **override**: pluggable hook for emergency access rules
//! 5. **expansion_scope**: expansion managers act only in prospect or pilot regions
//!
//! The first failing step short-circuits and is named in the decision.

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![deny(unsafe_code)]

pub mod action;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod stages;

pub use action::{actions, ActionCatalog, ActionDefinition, Sensitivity};
pub use context::{AuthorizationRequest, ResourceContext};
pub use decision::{AuthorizationDecision, PolicyStep};
pub use engine::{PolicyEngine, PolicyEngineBuilder};
pub use error::{PolicyError, Result};
pub use hooks::{NoOverrides, NoStepUpVerification, OverrideHook, OverrideOutcome, StepUpVerifier};
pub use stages::{PolicyStage, StageResult};
