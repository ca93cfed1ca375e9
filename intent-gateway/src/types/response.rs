use serde::{Deserialize, Serialize};

use crate::types::service::ServiceName;

/// Result of classifying one [`IntentRequest`](super::request::IntentRequest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub intent_id: String,
    pub recognized_intent: RecognizedIntent,
    pub routing: RoutingDecision,
    pub metadata: ResponseMetadata,
    pub contextual_factors: ContextualFactors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedIntent {
    pub category: String,
    /// Fused score of the winning service, clamped to `[0, 1]`.
    pub confidence: f64,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub target_service: ServiceName,
    pub priority: i64,
    pub strategy: String,
    pub timeout_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub processing_time_millis: u64,
    pub cache_hit: bool,
    pub model_version: String,
}

/// Per-factor weighted values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextualFactors {
    pub user_profile: f64,
    pub request_metadata: f64,
    pub system_state: f64,
    pub temporal_context: f64,
    pub business_logic: f64,
}

impl ContextualFactors {
    /// Mean of the five factors, used for the fusion multiplier.
    #[must_use]
    pub fn average(&self) -> f64 {
        (self.user_profile
            + self.request_metadata
            + self.system_state
            + self.temporal_context
            + self.business_logic)
            / 5.0
    }

    #[must_use]
    pub fn all_in_bounds(&self) -> bool {
        [
            self.user_profile,
            self.request_metadata,
            self.system_state,
            self.temporal_context,
            self.business_logic,
        ]
        .iter()
        .all(|factor| (0.0..=1.0).contains(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_average() {
        let factors = ContextualFactors {
            user_profile: 0.7,
            request_metadata: 0.5,
            system_state: 0.4,
            temporal_context: 0.9,
            business_logic: 0.75,
        };
        assert!((factors.average() - 0.65).abs() < 1e-9);
        assert!(factors.all_in_bounds());
    }

    #[test]
    fn response_round_trips_with_camel_case_keys() {
        let response = IntentResponse {
            intent_id: "intent-1".to_string(),
            recognized_intent: RecognizedIntent {
                category: "authentication".to_string(),
                confidence: 0.83,
                keywords: vec!["password".to_string()],
                ml_model: Some("heuristic-keywords".to_string()),
            },
            routing: RoutingDecision {
                target_service: ServiceName::from("user-authentication-service"),
                priority: 100,
                strategy: "ml-enhanced".to_string(),
                timeout_millis: 30_000,
            },
            metadata: ResponseMetadata {
                processing_time_millis: 3,
                cache_hit: false,
                model_version: "heuristic-keywords".to_string(),
            },
            contextual_factors: ContextualFactors {
                user_profile: 0.5,
                request_metadata: 0.5,
                system_state: 0.4,
                temporal_context: 0.4,
                business_logic: 0.75,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["recognizedIntent"]["category"], "authentication");
        assert_eq!(json["routing"]["targetService"], "user-authentication-service");
        let parsed: IntentResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, response);
    }
}
