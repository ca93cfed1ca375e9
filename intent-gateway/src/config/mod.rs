pub mod cache;
pub mod llm;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod router;
pub mod routing;
pub mod server;

use std::{path::PathBuf, time::Duration};

use config::ConfigError;
use displaydoc::Display;
use json_patch::merge;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    config::manifest::RefreshProfile, error::init::InitError,
    types::secret::Secret,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/intent-gateway/config.yaml";

#[derive(Debug, Error, Display)]
pub enum Error {
    /// error collecting config sources: {0}
    Source(#[from] ConfigError),
    /// deserialization error for input config: {0}
    InputConfigDeserialization(#[from] serde_path_to_error::Error<ConfigError>),
    /// deserialization error for merged config: {0}
    MergedConfigDeserialization(
        #[from] serde_path_to_error::Error<serde_json::Error>,
    ),
    /// URL parsing error: {0}
    UrlParse(#[from] url::ParseError),
    /// failed to load routing bundle {0}: {1}
    RoutingFile(PathBuf, String),
    /// invalid pattern in category `{0}`: {1}
    InvalidPattern(String, String),
    /// duplicate routing rule id `{0}`
    DuplicateRuleId(String),
    /// invalid value for environment variable {0}
    InvalidEnv(&'static str),
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub logging: self::logging::LoggingConfig,
    pub server: self::server::ServerConfig,
    pub cache: self::cache::CacheConfig,
    pub llm: self::llm::LlmConfig,
    pub registry: self::registry::RegistryConfig,
    pub router: self::router::RouterConfig,
    pub manifest: self::manifest::ManifestConfig,
    /// Directory holding `meta-routing.json` / `routing-rules.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
}

impl Config {
    /// Layered read: embedded defaults, then the config file, then
    /// `INTENT_GATEWAY__`-prefixed environment, then the flat deployment
    /// variables (`PORT`, `REDIS_URL`, `GEMINI_API_KEY`, ...) recognized for
    /// parity with the platform's conventions.
    pub fn try_read(
        config_file_path: Option<PathBuf>,
    ) -> Result<Self, Box<Error>> {
        let mut default_config = serde_json::to_value(Self::default())
            .expect("default config is serializable");
        let mut builder = config::Config::builder();
        let file_path = config_file_path
            .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));
        if let Some(path) = file_path {
            builder = builder.add_source(config::File::from(path));
        } else if std::fs::exists(DEFAULT_CONFIG_PATH).unwrap_or_default() {
            builder = builder.add_source(config::File::from(PathBuf::from(
                DEFAULT_CONFIG_PATH,
            )));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("INTENT_GATEWAY")
                .try_parsing(true)
                .separator("__")
                .convert_case(config::Case::Kebab),
        );
        let input_config: serde_json::Value = builder
            .build()
            .map_err(Error::from)
            .map_err(Box::new)?
            .try_deserialize()
            .map_err(Error::from)
            .map_err(Box::new)?;
        merge(&mut default_config, &input_config);

        let mut config: Config =
            serde_path_to_error::deserialize(default_config)
                .map_err(Error::from)
                .map_err(Box::new)?;

        apply_env_overrides(&mut config).map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.registry.services.is_empty() {
            return Err(InitError::InvalidConfig(
                "registry.services must not be empty".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for descriptor in &self.registry.services {
            if !names.insert(descriptor.name.as_str()) {
                return Err(InitError::InvalidConfig(format!(
                    "duplicate service `{}`",
                    descriptor.name
                )));
            }
        }
        let manifest = &self.manifest;
        for threshold in [
            manifest.drift_warning_threshold,
            manifest.drift_critical_threshold,
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(InitError::InvalidConfig(
                    "drift thresholds must be within [0, 1]".to_string(),
                ));
            }
        }
        if manifest.drift_warning_threshold > manifest.drift_critical_threshold
        {
            return Err(InitError::InvalidConfig(
                "drift warning threshold exceeds the critical threshold"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// The flat, platform-conventional variables. These intentionally do not use
/// the `INTENT_GATEWAY__` prefix, so they are re-read here after the merge.
#[allow(clippy::too_many_lines)]
fn apply_env_overrides(config: &mut Config) -> Result<(), Error> {
    let var = |name: &str| std::env::var(name).ok();

    if let Some(port) = var("PORT") {
        config.server.port =
            port.parse().map_err(|_| Error::InvalidEnv("PORT"))?;
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(dir) = var("CONFIG_DIR") {
        config.config_dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = var("MANIFEST_DIR") {
        config.manifest.dir = PathBuf::from(dir);
    }
    if let Some(dir) = var("MANIFEST_HISTORY_DIR") {
        config.manifest.history_dir = PathBuf::from(dir);
    }
    if let Some(ttl) = var("TELEMETRY_CACHE_TTL_MS") {
        let millis: u64 = ttl
            .parse()
            .map_err(|_| Error::InvalidEnv("TELEMETRY_CACHE_TTL_MS"))?;
        config.manifest.telemetry_cache_ttl = Duration::from_millis(millis);
    }
    if let Some(profile) = var("MANIFEST_REFRESH_PROFILE") {
        config.manifest.default_profile = profile
            .parse::<RefreshProfile>()
            .map_err(|_| Error::InvalidEnv("MANIFEST_REFRESH_PROFILE"))?;
    }
    if let Some(flag) = var("AUTO_APPLY_LOW_RISK") {
        config.manifest.auto_apply_low_risk = parse_bool(&flag);
    }
    if let Some(threshold) = var("DRIFT_WARNING_THRESHOLD") {
        config.manifest.drift_warning_threshold = threshold
            .parse()
            .map_err(|_| Error::InvalidEnv("DRIFT_WARNING_THRESHOLD"))?;
    }
    if let Some(threshold) = var("DRIFT_CRITICAL_THRESHOLD") {
        config.manifest.drift_critical_threshold = threshold
            .parse()
            .map_err(|_| Error::InvalidEnv("DRIFT_CRITICAL_THRESHOLD"))?;
    }
    if let Some(flag) = var("ROUTER_FORWARD_ENABLED") {
        config.router.forward_enabled = parse_bool(&flag);
    }

    if let Some(url) = var("REDIS_URL") {
        config.cache.redis.host_url =
            Secret::from(url.parse::<Url>().map_err(Error::UrlParse)?);
        config.cache.store = self::cache::CacheStore::Redis;
    } else if let Some(host) = var("REDIS_HOST") {
        let port = var("REDIS_PORT").unwrap_or_else(|| "6379".to_string());
        let scheme = if var("REDIS_TLS").as_deref().is_some_and(parse_bool) {
            "rediss"
        } else {
            "redis"
        };
        let auth = var("REDIS_PASSWORD")
            .map(|password| format!(":{password}@"))
            .unwrap_or_default();
        let url = format!("{scheme}://{auth}{host}:{port}");
        config.cache.redis.host_url =
            Secret::from(url.parse::<Url>().map_err(Error::UrlParse)?);
        config.cache.store = self::cache::CacheStore::Redis;
    }
    if let Some(flag) = var("REDIS_DISABLED") {
        config.cache.redis.disabled = parse_bool(&flag);
    }
    if let Some(timeout) = var("REDIS_CONNECT_TIMEOUT") {
        let millis: u64 = timeout
            .parse()
            .map_err(|_| Error::InvalidEnv("REDIS_CONNECT_TIMEOUT"))?;
        config.cache.redis.connection_timeout = Duration::from_millis(millis);
    }
    if let Some(timeout) = var("REDIS_COMMAND_TIMEOUT") {
        let millis: u64 = timeout
            .parse()
            .map_err(|_| Error::InvalidEnv("REDIS_COMMAND_TIMEOUT"))?;
        config.cache.redis.command_timeout = Duration::from_millis(millis);
    }

    if let Some(api_key) = var("GEMINI_API_KEY") {
        config.llm.gemini.api_key = Some(Secret::from(api_key));
    }
    if let Some(model) = var("GEMINI_MODEL") {
        config.llm.gemini.model = model;
    }
    if let Some(provider) = var("LLM_PROVIDER") {
        config.llm.provider = match provider.to_ascii_lowercase().as_str() {
            "gemini" => self::llm::LlmProvider::Gemini,
            _ => self::llm::LlmProvider::Disabled,
        };
    }

    Ok(())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_serializable() {
        // if it doesn't panic, it's good
        let _config = serde_json::to_string(&Config::default())
            .expect("default config is serializable");
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        for form in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_bool(form), "{form}");
        }
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
    }

    #[test]
    fn cache_config_round_trip() {
        let config = Config::default();
        let serialized = serde_json::to_string(&config.cache.store).unwrap();
        let deserialized =
            serde_json::from_str::<self::cache::CacheStore>(&serialized)
                .unwrap();
        assert_eq!(config.cache.store, deserialized);
    }

    #[test]
    fn router_config_round_trip() {
        let config = Config::default();
        let serialized = serde_json::to_string(&config.router).unwrap();
        let deserialized =
            serde_json::from_str::<self::router::RouterConfig>(&serialized)
                .unwrap();
        assert_eq!(config.router, deserialized);
    }

    #[test]
    fn manifest_config_round_trip() {
        let config = Config::default();
        let serialized = serde_json::to_string(&config.manifest).unwrap();
        let deserialized =
            serde_json::from_str::<self::manifest::ManifestConfig>(&serialized)
                .unwrap();
        assert_eq!(config.manifest, deserialized);
    }
}
