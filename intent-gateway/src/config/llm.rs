use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::secret::Secret;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub gemini: GeminiConfig,
}

impl LlmConfig {
    /// The remote classifier is only usable with a provider and a key.
    #[must_use]
    pub fn remote_enabled(&self) -> bool {
        self.provider == LlmProvider::Gemini && self.gemini.api_key.is_some()
    }
}

#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq,
)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProvider {
    #[default]
    Gemini,
    /// No remote calls; the heuristic classifier answers everything.
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct GeminiConfig {
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub base_url: Url,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: "https://generativelanguage.googleapis.com"
                .parse()
                .unwrap(),
        }
    }
}
