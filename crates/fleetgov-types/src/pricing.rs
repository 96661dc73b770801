//! Pricing and surge profiles.
//!
//! A profile carries the fare parameters for one service in one region, a set
//! of keyed pricing components and the driver earnings policy. Components and
//! the earnings policy are stored as separate rows beside the profile header.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::diff::{ChangeDiff, DiffError};
use crate::ids::{ProfileId, RegionId, ServiceKey};
use crate::validation::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Draft,
    Active,
    Superseded,
    Archived,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Archived => "archived",
        }
    }
}

/// How a component amount is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Flat,
    PerKm,
    PerMinute,
    Percentage,
}

/// A single keyed fare component (booking fee, airport surcharge, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingComponent {
    pub label: String,
    pub kind: ComponentKind,
    /// Minor currency units, or basis points for `Percentage`
    pub amount: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PricingComponent {
    pub fn new(label: impl Into<String>, kind: ComponentKind, amount: i64) -> Self {
        Self {
            label: label.into(),
            kind,
            amount,
            enabled: true,
        }
    }
}

/// Driver earnings policy attached to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsPolicy {
    pub driver_share_pct: f64,
    pub platform_fee_pct: f64,
    pub min_payout_cents: i64,
    #[serde(default)]
    pub incentive_pool_pct: Option<f64>,
}

impl Default for EarningsPolicy {
    fn default() -> Self {
        Self {
            driver_share_pct: 75.0,
            platform_fee_pct: 25.0,
            min_payout_cents: 0,
            incentive_pool_pct: None,
        }
    }
}

/// A pricing/surge profile as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingProfile {
    pub id: ProfileId,
    pub region_id: RegionId,
    pub service_key: ServiceKey,
    pub name: String,
    pub status: ProfileStatus,
    pub currency: String,
    pub base_fare_cents: i64,
    pub per_km_cents: i64,
    pub per_minute_cents: i64,
    pub minimum_fare_cents: i64,
    pub surge_cap: f64,
    pub components: BTreeMap<String, PricingComponent>,
    pub earnings_policy: EarningsPolicy,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PricingProfile {
    pub fn from_draft(
        region_id: RegionId,
        service_key: ServiceKey,
        draft: ProfileDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProfileId::generate(),
            region_id,
            service_key,
            name: draft.name,
            status: ProfileStatus::Draft,
            currency: draft.currency,
            base_fare_cents: draft.base_fare_cents,
            per_km_cents: draft.per_km_cents,
            per_minute_cents: draft.per_minute_cents,
            minimum_fare_cents: draft.minimum_fare_cents,
            surge_cap: draft.surge_cap,
            components: draft.components,
            earnings_policy: draft.earnings_policy,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_draft(&self) -> ProfileDraft {
        ProfileDraft {
            name: self.name.clone(),
            status: self.status,
            currency: self.currency.clone(),
            base_fare_cents: self.base_fare_cents,
            per_km_cents: self.per_km_cents,
            per_minute_cents: self.per_minute_cents,
            minimum_fare_cents: self.minimum_fare_cents,
            surge_cap: self.surge_cap,
            components: self.components.clone(),
            earnings_policy: self.earnings_policy.clone(),
        }
    }

    /// Compute the diff from this profile to a desired state.
    pub fn diff_to(&self, desired: &ProfileDraft) -> Result<ChangeDiff, DiffError> {
        ChangeDiff::builder()
            .field("name", &self.name, &desired.name)
            .field("status", &self.status, &desired.status)
            .field("currency", &self.currency, &desired.currency)
            .field("base_fare_cents", &self.base_fare_cents, &desired.base_fare_cents)
            .field("per_km_cents", &self.per_km_cents, &desired.per_km_cents)
            .field(
                "per_minute_cents",
                &self.per_minute_cents,
                &desired.per_minute_cents,
            )
            .field(
                "minimum_fare_cents",
                &self.minimum_fare_cents,
                &desired.minimum_fare_cents,
            )
            .field("surge_cap", &self.surge_cap, &desired.surge_cap)
            .nested("components", &self.components, &desired.components)
            .nested_struct(
                "earnings_policy",
                &self.earnings_policy,
                &desired.earnings_policy,
            )
            .build()
    }
}

/// Desired state of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub name: String,
    pub status: ProfileStatus,
    pub currency: String,
    pub base_fare_cents: i64,
    pub per_km_cents: i64,
    pub per_minute_cents: i64,
    pub minimum_fare_cents: i64,
    pub surge_cap: f64,
    #[serde(default)]
    pub components: BTreeMap<String, PricingComponent>,
    #[serde(default)]
    pub earnings_policy: EarningsPolicy,
}

impl ProfileDraft {
    pub fn validate(&self, max_multiplier: f64) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            errors.push(FieldError::new("currency", "must be a three-letter ISO code"));
        }
        for (field, value) in [
            ("base_fare_cents", self.base_fare_cents),
            ("per_km_cents", self.per_km_cents),
            ("per_minute_cents", self.per_minute_cents),
            ("minimum_fare_cents", self.minimum_fare_cents),
        ] {
            if value < 0 {
                errors.push(FieldError::new(field, "must not be negative"));
            }
        }
        if !(1.0..=max_multiplier).contains(&self.surge_cap) {
            errors.push(FieldError::new(
                "surge_cap",
                format!("must be between 1.0 and {}", max_multiplier),
            ));
        }
        for (key, component) in &self.components {
            if key.trim().is_empty() {
                errors.push(FieldError::new("components", "component keys must not be empty"));
            }
            if component.amount < 0 {
                errors.push(FieldError::new(
                    format!("components.{}.amount", key),
                    "must not be negative",
                ));
            }
        }

        let policy = &self.earnings_policy;
        let share_total = policy.driver_share_pct + policy.platform_fee_pct;
        if (share_total - 100.0).abs() > f64::EPSILON * 100.0 {
            errors.push(FieldError::new(
                "earnings_policy",
                "driver share and platform fee must add up to 100",
            ));
        }
        if policy.min_payout_cents < 0 {
            errors.push(FieldError::new(
                "earnings_policy.min_payout_cents",
                "must not be negative",
            ));
        }

        errors
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_draft() -> ProfileDraft {
        ProfileDraft {
            name: "NYC economy".into(),
            status: ProfileStatus::Draft,
            currency: "USD".into(),
            base_fare_cents: 250,
            per_km_cents: 120,
            per_minute_cents: 30,
            minimum_fare_cents: 800,
            surge_cap: 3.0,
            components: BTreeMap::from([
                (
                    "booking_fee".to_string(),
                    PricingComponent::new("Booking fee", ComponentKind::Flat, 150),
                ),
                (
                    "airport".to_string(),
                    PricingComponent::new("Airport surcharge", ComponentKind::Flat, 500),
                ),
            ]),
            earnings_policy: EarningsPolicy::default(),
        }
    }

    #[test]
    fn diff_includes_all_components_and_earnings_fields() {
        let profile = PricingProfile::from_draft(
            RegionId::new("nyc"),
            ServiceKey::new("economy"),
            sample_draft(),
            Utc::now(),
        );
        let mut desired = profile.to_draft();
        desired.base_fare_cents = 275;
        if let Some(airport) = desired.components.get_mut("airport") {
            airport.amount = 600;
        }

        let diff = profile.diff_to(&desired).unwrap();
        assert_eq!(diff.changed_fields(), vec!["base_fare_cents", "components"]);
        assert_eq!(diff.nested("components").unwrap().len(), 2);
        assert_eq!(diff.changed_items("components"), vec!["airport"]);
        assert_eq!(diff.nested("earnings_policy").unwrap().len(), 4);
        assert!(diff.changed_items("earnings_policy").is_empty());

        let applied = diff.apply(&profile).unwrap();
        assert_eq!(applied.to_draft(), desired);
    }

    #[test]
    fn validation_catches_bad_shares_and_currency() {
        let mut draft = sample_draft();
        draft.currency = "usd".into();
        draft.earnings_policy.platform_fee_pct = 30.0;
        draft.surge_cap = 0.5;
        let fields: Vec<_> = draft
            .validate(10.0)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["currency", "surge_cap", "earnings_policy"]);
    }

    #[test]
    fn sample_is_valid() {
        assert!(sample_draft().validate(10.0).is_empty());
    }
}
