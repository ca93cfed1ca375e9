//! Pattern evidence: keyword overlap against tokenized text, with a floor
//! of 0.8 whenever the request path matches one of the category's regexes.

use regex::Regex;

use super::classifier::ServiceScores;
use crate::{
    config::routing::RoutingConfig, error::init::InitError,
    types::request::IntentRequest, types::service::ServiceName,
};

const PATH_MATCH_FLOOR: f64 = 0.8;

pub struct PatternMatcher {
    entries: Vec<PatternEntry>,
}

struct PatternEntry {
    target: ServiceName,
    keywords: Vec<String>,
    regexes: Vec<Regex>,
}

impl PatternMatcher {
    pub fn compile(config: &RoutingConfig) -> Result<Self, InitError> {
        let mut entries = Vec::new();
        for (name, category) in &config.intent_categories {
            let regexes = category
                .patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| {
                        InitError::InvalidRule(name.clone(), e.to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(PatternEntry {
                target: category.target_service.clone(),
                keywords: category
                    .keywords
                    .iter()
                    .map(|keyword| keyword.to_lowercase())
                    .collect(),
                regexes,
            });
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn score(&self, request: &IntentRequest) -> ServiceScores {
        let tokens: Vec<String> = request
            .text_trimmed()
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .collect();
        let path = request.http_path.as_deref();

        let mut scores = ServiceScores::new();
        for entry in &self.entries {
            let mut score = entry.overlap_ratio(&tokens);
            if let Some(path) = path
                && entry.regexes.iter().any(|regex| regex.is_match(path))
            {
                score = score.max(PATH_MATCH_FLOOR);
            }
            if score > 0.0 {
                let slot =
                    scores.entry(entry.target.clone()).or_insert(0.0);
                *slot = slot.max(score.min(1.0));
            }
        }
        scores
    }
}

impl PatternEntry {
    fn overlap_ratio(&self, tokens: &[String]) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let matched = self
            .keywords
            .iter()
            .filter(|keyword| tokens.iter().any(|token| token == *keyword))
            .count() as f64;
        #[allow(clippy::cast_precision_loss)]
        let ratio = matched / self.keywords.len() as f64;
        ratio.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> PatternMatcher {
        PatternMatcher::compile(&RoutingConfig::default()).unwrap()
    }

    #[test]
    fn keyword_overlap_produces_a_ratio() {
        let request = IntentRequest::from_text(
            "refund the payment for this invoice",
        );
        let scores = matcher().score(&request);
        let payment = scores
            .get(&ServiceName::from("payment-processing-service"))
            .copied()
            .unwrap();
        // refund, payment, invoice out of 9 keywords
        assert!((payment - 3.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn path_match_floors_the_score() {
        let request = IntentRequest {
            http_path: Some("/auth/login".to_string()),
            ..IntentRequest::default()
        };
        let scores = matcher().score(&request);
        let auth = scores
            .get(&ServiceName::from("user-authentication-service"))
            .copied()
            .unwrap();
        assert!(auth >= PATH_MATCH_FLOOR);
    }

    #[test]
    fn no_signal_means_no_entries() {
        let request = IntentRequest::from_text("zzz");
        assert!(matcher().score(&request).is_empty());
    }
}
