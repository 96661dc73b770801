//! Emergency brake position.
//!
//! One row shared by every process that talks to the same store. While it is
//! engaged no governed change reaches live effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Current brake position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrakeState {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged_at: Option<DateTime<Utc>>,
}

impl BrakeState {
    pub fn engaged(
        reason: impl Into<String>,
        engaged_by: UserId,
        engaged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            active: true,
            reason: Some(reason.into()),
            engaged_by: Some(engaged_by),
            engaged_at: Some(engaged_at),
        }
    }

    pub fn released() -> Self {
        Self::default()
    }
}
