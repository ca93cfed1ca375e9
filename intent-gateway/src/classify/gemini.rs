//! Remote LLM classifier with a deterministic prompt and strict JSON
//! parsing, chained onto the keyword heuristic.

use std::{sync::RwLock, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    classifier::{Classifier, ClassifyError, ServiceScores},
    heuristic::{HEURISTIC_MODEL_ID, KeywordClassifier},
};
use crate::{
    config::llm::{GeminiConfig, LlmConfig},
    error::init::InitError,
    types::service::ServiceName,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_OUTPUT_TOKENS: u32 = 1024;
const TEMPERATURE: f64 = 0.2;

/// Remote-first classification with heuristic fallback.
///
/// The active model id reflects the source that actually answered the most
/// recent call: `gemini:<model>` on success, `heuristic-keywords` otherwise.
pub struct LlmClassifier {
    remote: Option<GeminiClient>,
    fallback: KeywordClassifier,
    active_model_id: RwLock<String>,
}

impl LlmClassifier {
    pub fn new(config: &LlmConfig) -> Result<Self, InitError> {
        let remote = if config.remote_enabled() {
            Some(GeminiClient::new(config.gemini.clone())?)
        } else {
            tracing::info!(
                "remote classifier disabled, heuristic keywords only"
            );
            None
        };
        Ok(Self {
            remote,
            fallback: KeywordClassifier,
            active_model_id: RwLock::new(HEURISTIC_MODEL_ID.to_string()),
        })
    }

    #[must_use]
    pub fn active_model_id(&self) -> String {
        self.active_model_id
            .read()
            .expect("model id lock never poisoned")
            .clone()
    }

    fn set_active_model_id(&self, id: String) {
        *self
            .active_model_id
            .write()
            .expect("model id lock never poisoned") = id;
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        text: &str,
        known_services: &[ServiceName],
    ) -> Result<ServiceScores, ClassifyError> {
        if let Some(remote) = &self.remote {
            match remote.classify(text, known_services).await {
                Ok(scores) if !scores.is_empty() => {
                    self.set_active_model_id(remote.model_id());
                    return Ok(scores);
                }
                Ok(_) => {
                    tracing::debug!(
                        "remote classifier returned no scores, falling back"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "remote classifier failed, falling back to keywords"
                    );
                }
            }
        }
        self.set_active_model_id(HEURISTIC_MODEL_ID.to_string());
        self.fallback.classify(text, known_services).await
    }

    fn model_id(&self) -> String {
        self.active_model_id()
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ScoredServices {
    #[serde(default)]
    services: Vec<ScoredService>,
}

#[derive(Debug, Deserialize)]
struct ScoredService {
    name: String,
    score: f64,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, InitError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    fn model_id(&self) -> String {
        format!("gemini:{}", self.config.model)
    }

    async fn classify(
        &self,
        text: &str,
        known_services: &[ServiceName],
    ) -> Result<ServiceScores, ClassifyError> {
        let url = format!(
            "{}v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(ClassifyError::Empty)?;
        let body = json!({
            "contents": [{"parts": [{"text": build_prompt(text, known_services)}]}],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "topK": 1,
                "topP": 1.0,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "responseMimeType": "application/json",
            },
        });
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key.expose())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status));
        }
        let payload: GenerateContentResponse = response.json().await?;
        let text = payload
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.as_str())
            .ok_or(ClassifyError::Empty)?;
        parse_scores(text, known_services)
    }
}

fn build_prompt(text: &str, known_services: &[ServiceName]) -> String {
    let mut names = String::new();
    for service in known_services {
        names.push_str("- ");
        names.push_str(service.as_str());
        names.push('\n');
    }
    format!(
        "You score which backend service should handle a request.\n\
         Known services:\n{names}\
         Request text:\n\"{text}\"\n\
         Respond with strict JSON only, shaped exactly as:\n\
         {{\"services\":[{{\"name\":\"<known-service>\",\"score\":0.0,\"reason\":\"<short>\"}}]}}\n\
         Use only the known service names. Scores are between 0 and 1."
    )
}

/// Parse the model output: full-body JSON first, then the first balanced
/// `{...}` block. Unknown names are dropped; scores are clamped to `[0, 1]`
/// (non-finite becomes 0) and rounded to 4 decimals.
fn parse_scores(
    raw: &str,
    known_services: &[ServiceName],
) -> Result<ServiceScores, ClassifyError> {
    let parsed: ScoredServices = serde_json::from_str(raw.trim())
        .or_else(|_| {
            let block = first_json_block(raw).ok_or_else(|| {
                ClassifyError::Parse("no JSON object found".to_string())
            })?;
            serde_json::from_str(block)
                .map_err(|e| ClassifyError::Parse(e.to_string()))
        })?;

    let mut scores = ServiceScores::new();
    for entry in parsed.services {
        let name = ServiceName::new(&entry.name);
        if !known_services.contains(&name) {
            continue;
        }
        let score = if entry.score.is_finite() {
            entry.score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        scores.insert(name, (score * 10_000.0).round() / 10_000.0);
    }
    if scores.is_empty() {
        return Err(ClassifyError::Empty);
    }
    Ok(scores)
}

fn first_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in raw[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
