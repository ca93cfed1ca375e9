use async_trait::async_trait;
use indexmap::IndexMap;

use crate::types::service::ServiceName;

/// Per-service scores in `[0, 1]`, insertion-ordered.
pub type ServiceScores = IndexMap<ServiceName, f64>;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier returned status {0}")]
    Status(http::StatusCode),
    #[error("classifier response unparseable: {0}")]
    Parse(String),
    #[error("classifier returned no usable scores")]
    Empty,
}

/// A source of service scores for a piece of text.
///
/// Two implementations exist: the remote LLM and the keyword heuristic. The
/// engine composes them remote-first, falling back on error or empty output.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        known_services: &[ServiceName],
    ) -> Result<ServiceScores, ClassifyError>;

    /// Stable identifier reported in responses, e.g. `gemini:gemini-2.0-flash`.
    fn model_id(&self) -> String;
}
