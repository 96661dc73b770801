//! Strongly-typed identifiers for governed entities
//!
//! Generated identifiers are UUID-based; identifiers that come from outside
//! the core (users, regions, service keys, H3 cells) wrap the external string.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse either the bare UUID or the prefixed display form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let raw = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                Uuid::parse_str(raw).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a role definition
    RoleId,
    "role"
);
uuid_id!(
    /// Identifier of a pricing/surge profile
    ProfileId,
    "profile"
);
uuid_id!(
    /// Identifier of a change proposal
    ProposalId,
    "proposal"
);
uuid_id!(
    /// Identifier of a time-window surge schedule
    ScheduleId,
    "schedule"
);
uuid_id!(
    /// Identifier of an audit log entry
    AuditEntryId,
    "audit"
);

string_id!(
    /// Identity of an operator, as issued by the identity provider
    UserId
);
string_id!(
    /// Operating region identifier
    RegionId
);
string_id!(
    /// Service line key (e.g. `economy`, `premium`, `taxi`)
    ServiceKey
);
string_id!(
    /// H3 hexagonal cell index in its canonical hex-string form
    H3Index
);

impl ServiceKey {
    /// Service key that never receives region-wide scheduled surge.
    pub const TAXI: &'static str = "taxi";

    pub fn is_taxi(&self) -> bool {
        self.0 == Self::TAXI
    }
}
