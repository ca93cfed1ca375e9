use async_trait::async_trait;

use super::classifier::{Classifier, ClassifyError, ServiceScores};
use crate::types::service::ServiceName;

pub const HEURISTIC_MODEL_ID: &str = "heuristic-keywords";

const FALLBACK_SERVICE: &str = "api-gateway-service";
const FALLBACK_SCORE: f64 = 0.4;

/// Fixed keyword buckets over the service taxonomy. A bucket scores
/// `min(1, matches / keyword_count + 0.2)` once any keyword matches.
const BUCKETS: &[(&str, &[&str])] = &[
    (
        "user-authentication-service",
        &[
            "login", "password", "auth", "signin", "sign in", "logout",
            "register", "credential", "token", "session",
        ],
    ),
    (
        "payment-processing-service",
        &[
            "payment", "charge", "invoice", "billing", "credit card",
            "refund", "subscription", "checkout", "pay",
        ],
    ),
    (
        "image-processing-service",
        &[
            "image", "photo", "thumbnail", "resize", "crop", "picture",
            "upload", "media",
        ],
    ),
    (
        "notification-service",
        &["notify", "notification", "email", "sms", "push", "alert"],
    ),
    (
        "analytics-service",
        &["analytics", "report", "metric", "dashboard", "statistic", "insight"],
    ),
    (
        "search-service",
        &["search", "find", "query", "lookup", "filter"],
    ),
    (
        "data-storage-service",
        &["database", "record", "store", "save", "fetch", "backup"],
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    #[must_use]
    pub fn scores(text: &str) -> ServiceScores {
        let haystack = text.trim().to_lowercase();
        let mut scores = ServiceScores::new();
        for (service, keywords) in BUCKETS {
            #[allow(clippy::cast_precision_loss)]
            let matches = keywords
                .iter()
                .filter(|keyword| haystack.contains(**keyword))
                .count() as f64;
            if matches > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                let score =
                    (matches / keywords.len() as f64 + 0.2).min(1.0);
                scores.insert(ServiceName::from(*service), score);
            }
        }
        if scores.is_empty() {
            scores.insert(ServiceName::from(FALLBACK_SERVICE), FALLBACK_SCORE);
        }
        scores
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        _known_services: &[ServiceName],
    ) -> Result<ServiceScores, ClassifyError> {
        Ok(Self::scores(text))
    }

    fn model_id(&self) -> String {
        HEURISTIC_MODEL_ID.to_string()
    }
}
