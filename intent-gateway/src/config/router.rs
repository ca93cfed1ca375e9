use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct RouterConfig {
    /// When false, `/route` synthesizes a response instead of forwarding.
    pub forward_enabled: bool,
    pub breaker: BreakerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            forward_enabled: false,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct BreakerConfig {
    /// Error percentage over the sliding window that opens the circuit.
    pub error_threshold_percent: u8,
    /// Calls slower than this count as failures.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// How long the circuit stays open before admitting a probe.
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Number of recent outcomes kept in the sliding window.
    pub window_size: usize,
    /// Outcomes required in the window before the threshold applies.
    pub minimum_requests: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percent: 50,
            call_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            window_size: 20,
            minimum_requests: 5,
        }
    }
}
