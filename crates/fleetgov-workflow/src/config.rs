//! Governance configuration

use fleetgov_types::ServiceKey;
use serde::{Deserialize, Serialize};

/// Tunables for the governed-change workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Approval thresholds
    #[serde(default)]
    pub approvals: ApprovalConfig,

    /// Surge schedule limits
    #[serde(default)]
    pub surge: SurgeConfig,

    /// Role level bounds
    #[serde(default)]
    pub roles: RoleConfig,
}

impl GovernanceConfig {
    /// Approvals required for a change.
    pub fn required_approvals(&self, regulator_impact: bool) -> u32 {
        if regulator_impact {
            self.approvals.regulator_impact
        } else {
            self.approvals.baseline
        }
    }
}

/// Approval thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Approvals for an ordinary change
    #[serde(default = "default_baseline_approvals")]
    pub baseline: u32,

    /// Approvals for a change flagged as regulator-impacting
    #[serde(default = "default_regulator_approvals")]
    pub regulator_impact: u32,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            baseline: default_baseline_approvals(),
            regulator_impact: default_regulator_approvals(),
        }
    }
}

/// Surge schedule limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeConfig {
    /// Most cells a single region-wide promotion may write
    #[serde(default = "default_region_wide_hex_limit")]
    pub region_wide_hex_limit: usize,

    /// Services that never receive region-wide scheduled surge
    #[serde(default = "default_excluded_services")]
    pub excluded_region_wide_services: Vec<ServiceKey>,

    /// H3 resolution used when a schedule names none
    #[serde(default = "default_resolution")]
    pub default_resolution: u8,

    /// Upper bound for schedule multipliers and profile surge caps
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,
}

impl SurgeConfig {
    pub fn excludes_region_wide(&self, service: &ServiceKey) -> bool {
        self.excluded_region_wide_services.contains(service)
    }
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            region_wide_hex_limit: default_region_wide_hex_limit(),
            excluded_region_wide_services: default_excluded_services(),
            default_resolution: default_resolution(),
            max_multiplier: default_max_multiplier(),
        }
    }
}

/// Role level bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub min_level: u32,

    #[serde(default = "default_max_level")]
    pub max_level: u32,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            min_level: 0,
            max_level: default_max_level(),
        }
    }
}

fn default_baseline_approvals() -> u32 {
    2
}

fn default_regulator_approvals() -> u32 {
    3
}

fn default_region_wide_hex_limit() -> usize {
    5000
}

fn default_excluded_services() -> Vec<ServiceKey> {
    vec![ServiceKey::new(ServiceKey::TAXI)]
}

fn default_resolution() -> u8 {
    8
}

fn default_max_multiplier() -> f64 {
    10.0
}

fn default_max_level() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GovernanceConfig::default();
        assert_eq!(config.required_approvals(false), 2);
        assert_eq!(config.required_approvals(true), 3);
        assert_eq!(config.surge.region_wide_hex_limit, 5000);
        assert!(config.surge.excludes_region_wide(&ServiceKey::new("taxi")));
        assert!(!config.surge.excludes_region_wide(&ServiceKey::new("economy")));
        assert_eq!(config.roles.max_level, 100);
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: GovernanceConfig =
            serde_json::from_str(r#"{"approvals": {"baseline": 1}}"#).unwrap();
        assert_eq!(config.approvals.baseline, 1);
        assert_eq!(config.approvals.regulator_impact, 3);
        assert_eq!(config.surge.default_resolution, 8);
    }
}
