use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::service::ServiceDescriptor;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    pub services: Vec<ServiceDescriptor>,
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Per-probe deadline for `GET url + health_path`.
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

/// Built-in service taxonomy, overridable from the config file.
fn default_services() -> Vec<ServiceDescriptor> {
    [
        ("user-authentication-service", 8081, 10_000),
        ("payment-processing-service", 8082, 15_000),
        ("image-processing-service", 8083, 60_000),
        ("notification-service", 8084, 10_000),
        ("analytics-service", 8085, 30_000),
        ("search-service", 8086, 10_000),
        ("data-storage-service", 8087, 20_000),
        ("api-gateway-service", 8080, 30_000),
    ]
    .into_iter()
    .map(|(name, port, timeout_millis)| ServiceDescriptor {
        name: name.into(),
        url: format!("http://{name}:{port}").parse().unwrap(),
        health_path: "/health".to_string(),
        timeout_millis,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_taxonomy_includes_the_fallback_target() {
        let config = RegistryConfig::default();
        assert!(
            config
                .services
                .iter()
                .any(|s| s.name.as_str() == "api-gateway-service")
        );
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
    }
}
