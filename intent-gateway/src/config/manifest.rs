use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct ManifestConfig {
    /// Baseline manifests, read-only.
    pub dir: PathBuf,
    /// Generated revisions are written here.
    pub history_dir: PathBuf,
    pub default_profile: RefreshProfile,
    /// Apply low-risk refreshes without waiting for approval.
    pub auto_apply_low_risk: bool,
    pub drift_warning_threshold: f64,
    pub drift_critical_threshold: f64,
    #[serde(with = "humantime_serde")]
    pub telemetry_cache_ttl: Duration,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./manifests"),
            history_dir: PathBuf::from("./manifests/history"),
            default_profile: RefreshProfile::Balanced,
            auto_apply_low_risk: false,
            drift_warning_threshold: 0.4,
            drift_critical_threshold: 0.7,
            telemetry_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Preset biasing manifest suggestions.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RefreshProfile {
    #[default]
    Balanced,
    Performance,
    Cost,
    Compliance,
}
