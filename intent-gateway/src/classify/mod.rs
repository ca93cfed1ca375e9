//! The intent recognition engine: fuses evidence from the remote/heuristic
//! classifier, the in-process NLP model, routing rules, and path patterns,
//! applies the contextual multiplier, and caches by request fingerprint.

pub mod classifier;
pub mod context;
pub mod gemini;
pub mod heuristic;
pub mod nlp;
pub mod patterns;
pub mod rules;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use chrono::Timelike;
use tokio::sync::RwLock;

use self::{
    classifier::{Classifier, ServiceScores},
    gemini::LlmClassifier,
    nlp::NlpModel,
    patterns::PatternMatcher,
};
use crate::{
    cache::{ResponseCache, fingerprint},
    config::routing::RoutingConfig,
    error::{api::ApiError, init::InitError},
    metrics,
    registry::ServiceRegistry,
    types::{
        request::IntentRequest,
        response::{
            ContextualFactors, IntentResponse, RecognizedIntent,
            ResponseMetadata, RoutingDecision,
        },
        service::{DEFAULT_TIMEOUT_MILLIS, ServiceName},
    },
};

const ML_WEIGHT: f64 = 2.0;
const NLP_WEIGHT: f64 = 1.0;
const RULES_WEIGHT: f64 = 1.0;
const PATTERNS_WEIGHT: f64 = 1.0;
const FALLBACK_SERVICE: &str = "api-gateway-service";
const FALLBACK_CATEGORY: &str = "general";

/// Everything derived from one routing bundle. Swapped atomically on
/// reload so in-flight classifications keep a consistent view.
pub struct EngineState {
    pub config: RoutingConfig,
    nlp: NlpModel,
    patterns: PatternMatcher,
}

impl EngineState {
    pub fn build(config: RoutingConfig) -> Result<Self, InitError> {
        let nlp = NlpModel::train(&config);
        let patterns = PatternMatcher::compile(&config)?;
        Ok(Self {
            config,
            nlp,
            patterns,
        })
    }
}

pub struct IntentEngine {
    state: RwLock<Arc<EngineState>>,
    classifier: LlmClassifier,
    cache: ResponseCache,
    registry: Arc<ServiceRegistry>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl IntentEngine {
    pub fn new(
        config: RoutingConfig,
        classifier: LlmClassifier,
        cache: ResponseCache,
        registry: Arc<ServiceRegistry>,
    ) -> Result<Self, InitError> {
        Ok(Self {
            state: RwLock::new(Arc::new(EngineState::build(config)?)),
            classifier,
            cache,
            registry,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    pub async fn routing_config(&self) -> RoutingConfig {
        self.state.read().await.config.clone()
    }

    /// Replace the whole bundle; the NLP model retrains from the new
    /// categories.
    pub async fn replace_config(
        &self,
        config: RoutingConfig,
    ) -> Result<(), InitError> {
        let next = Arc::new(EngineState::build(config)?);
        *self.state.write().await = next;
        Ok(())
    }

    pub async fn update_rule(
        &self,
        rule_id: &str,
        rule: crate::config::routing::RoutingRule,
    ) -> Result<(), ApiError> {
        let mut config = self.routing_config().await;
        let Some(slot) = config
            .routing_rules
            .iter_mut()
            .find(|existing| existing.id == rule_id)
        else {
            return Err(ApiError::NotFound(format!(
                "routing rule `{rule_id}`"
            )));
        };
        *slot = rule;
        self.replace_config(config)
            .await
            .map_err(ApiError::internal)
    }

    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn active_model_id(&self) -> String {
        self.classifier.active_model_id()
    }

    pub async fn classify_intent(
        &self,
        request: &IntentRequest,
    ) -> Result<IntentResponse, ApiError> {
        if !request.is_classifiable() {
            return Err(ApiError::Validation(
                "at least one of `text` or `httpPath` is required"
                    .to_string(),
            ));
        }
        let started = Instant::now();
        let key = fingerprint(request);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<IntentResponse>(&cached) {
                Ok(mut response) => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_hit();
                    response.metadata.cache_hit = true;
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        response.metadata.processing_time_millis =
                            started.elapsed().as_millis() as u64;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        "cached response unparseable, reclassifying"
                    );
                }
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();

        let state = self.state.read().await.clone();
        let response = self
            .classify_uncached(&state, request, started)
            .await;

        let payload = serde_json::to_string(&response)
            .map_err(ApiError::internal)?;
        let ttl = std::time::Duration::from_secs(
            state.config.meta_routing.cache_ttl_seconds,
        );
        self.cache.put_with_ttl(&key, payload, ttl).await;
        Ok(response)
    }

    async fn classify_uncached(
        &self,
        state: &EngineState,
        request: &IntentRequest,
        started: Instant,
    ) -> IntentResponse {
        let text = request.text_trimmed();
        let known_services = self.registry.names();

        let ml_scores = match self
            .classifier
            .classify(text, &known_services)
            .await
        {
            Ok(scores) => scores,
            Err(error) => {
                tracing::warn!(error = %error, "all classifiers failed");
                ServiceScores::new()
            }
        };
        let nlp_scores = state.nlp.score(text);
        let rule_scores =
            rules::evaluate(&state.config.routing_rules, request);
        let pattern_scores = state.patterns.score(request);

        let healthy_services = self.registry.healthy_count().await;
        let factors = context::compute(
            request,
            healthy_services,
            &state.config.contextual_factors,
            chrono::Local::now().hour(),
        );

        let fused = fuse_scores(
            state,
            &[
                (&ml_scores, ML_WEIGHT),
                (&nlp_scores, NLP_WEIGHT),
                (&rule_scores, RULES_WEIGHT),
                (&pattern_scores, PATTERNS_WEIGHT),
            ],
            &factors,
        );
        let selection = select(&fused);

        let model_id = self.classifier.active_model_id();
        let threshold = state.config.meta_routing.confidence_threshold;
        if let Some((_, confidence)) = &selection
            && *confidence < threshold
        {
            // Annotation only: low-confidence results still route.
            tracing::debug!(
                confidence,
                threshold,
                "classification below the confidence threshold"
            );
        }

        self.build_response(state, selection, factors, model_id, started)
    }

    fn build_response(
        &self,
        state: &EngineState,
        selection: Option<(ServiceName, f64)>,
        factors: ContextualFactors,
        model_id: String,
        started: Instant,
    ) -> IntentResponse {
        let (target, confidence) = selection.unwrap_or_else(|| {
            (ServiceName::from(FALLBACK_SERVICE), 0.0)
        });
        let (category, keywords, priority) = state
            .config
            .category_for_service(&target)
            .map_or_else(
                || (FALLBACK_CATEGORY.to_string(), Vec::new(), 100),
                |(name, category)| {
                    (
                        name.to_string(),
                        category.keywords.clone(),
                        category.priority,
                    )
                },
            );
        let timeout_millis = self
            .registry
            .get_descriptor(&target)
            .map_or(DEFAULT_TIMEOUT_MILLIS, |d| d.timeout_millis);
        #[allow(clippy::cast_possible_truncation)]
        let processing_time_millis = started.elapsed().as_millis() as u64;

        IntentResponse {
            intent_id: uuid::Uuid::now_v7().to_string(),
            recognized_intent: RecognizedIntent {
                category,
                confidence,
                keywords,
                ml_model: Some(model_id.clone()),
            },
            routing: RoutingDecision {
                target_service: target,
                priority,
                strategy: state.config.meta_routing.algorithm.clone(),
                timeout_millis,
            },
            metadata: ResponseMetadata {
                processing_time_millis,
                cache_hit: false,
                model_version: model_id,
            },
            contextual_factors: factors,
        }
    }
}

/// Weighted average per candidate over the sources that scored it, then
/// the contextual multiplier, then a clamp. Candidate order comes from the
/// category table first so score ties resolve by insertion order.
fn fuse_scores(
    state: &EngineState,
    sources: &[(&ServiceScores, f64)],
    factors: &ContextualFactors,
) -> Vec<(ServiceName, f64)> {
    let mut candidates: Vec<ServiceName> = Vec::new();
    let mut push_unique = |name: &ServiceName,
                           candidates: &mut Vec<ServiceName>| {
        if !candidates.contains(name) {
            candidates.push(name.clone());
        }
    };
    for category in state.config.intent_categories.values() {
        push_unique(&category.target_service, &mut candidates);
    }
    for (scores, _) in sources {
        for name in scores.keys() {
            push_unique(name, &mut candidates);
        }
    }

    let multiplier = 1.0 + (factors.average() - 0.5) * 0.4;
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            for (scores, weight) in sources {
                if let Some(score) = scores.get(&candidate) {
                    weighted_sum += score * weight;
                    weight_total += weight;
                }
            }
            if weight_total == 0.0 {
                return None;
            }
            let fused = ((weighted_sum / weight_total) * multiplier)
                .clamp(0.0, 1.0);
            Some((candidate, fused))
        })
        .collect()
}

/// Argmax with strict comparison, so earlier candidates win ties.
fn select(fused: &[(ServiceName, f64)]) -> Option<(ServiceName, f64)> {
    let mut best: Option<(&ServiceName, f64)> = None;
    for (candidate, score) in fused {
        match best {
            Some((_, leading)) if *score <= leading => {}
            _ => best = Some((candidate, *score)),
        }
    }
    best.map(|(name, score)| (name.clone(), score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{cache::CacheConfig, llm::LlmConfig, registry::RegistryConfig},
        types::request::RequestContext,
    };

    fn engine() -> IntentEngine {
        let registry = Arc::new(
            ServiceRegistry::new(&RegistryConfig::default()).unwrap(),
        );
        IntentEngine::new(
            RoutingConfig::default(),
            LlmClassifier::new(&LlmConfig::default()).unwrap(),
            ResponseCache::from_config(&CacheConfig::default()),
            registry,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn password_reset_routes_to_authentication() {
        let engine = engine();
        let response = engine
            .classify_intent(&IntentRequest::from_text(
                "I forgot my password and need to reset it",
            ))
            .await
            .unwrap();
        assert_eq!(
            response.routing.target_service,
            ServiceName::from("user-authentication-service")
        );
        assert_eq!(response.recognized_intent.category, "authentication");
        assert!(response.recognized_intent.confidence > 0.0);
        assert!(!response.metadata.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_request_hits_the_cache() {
        let engine = engine();
        let request = IntentRequest::from_text(
            "I forgot my password and need to reset it",
        );
        let first = engine.classify_intent(&request).await.unwrap();
        let second = engine.classify_intent(&request).await.unwrap();
        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
        assert_eq!(first.recognized_intent, second.recognized_intent);
        assert_eq!(first.routing, second.routing);
        assert_eq!(engine.cache_stats(), (1, 1));
    }

    #[tokio::test]
    async fn payment_text_routes_to_payments_with_user_factor() {
        let engine = engine();
        let request = IntentRequest {
            text: Some(
                "Charge credit card for premium subscription renewal"
                    .to_string(),
            ),
            context: Some(RequestContext {
                user_id: Some("user-987".to_string()),
                metadata: Some(serde_json::json!({"amount": 149.99})),
                ..RequestContext::default()
            }),
            ..IntentRequest::default()
        };
        let response = engine.classify_intent(&request).await.unwrap();
        assert_eq!(
            response.routing.target_service,
            ServiceName::from("payment-processing-service")
        );
        assert!(
            (response.contextual_factors.user_profile - 0.7).abs() < 1e-9
        );
        assert_eq!(response.routing.timeout_millis, 15_000);
    }

    #[tokio::test]
    async fn image_text_falls_back_to_heuristic_model_id() {
        let engine = engine();
        let response = engine
            .classify_intent(&IntentRequest::from_text(
                "Resize the uploaded image thumbnails",
            ))
            .await
            .unwrap();
        assert_eq!(
            response.routing.target_service,
            ServiceName::from("image-processing-service")
        );
        assert_eq!(
            response.recognized_intent.ml_model.as_deref(),
            Some(heuristic::HEURISTIC_MODEL_ID)
        );
    }

    #[tokio::test]
    async fn empty_request_is_a_validation_error() {
        let engine = engine();
        let error = engine
            .classify_intent(&IntentRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn confidence_stays_in_bounds() {
        let engine = engine();
        for text in [
            "charge payment billing invoice refund card transaction",
            "zzz",
            "login login login login",
        ] {
            let response = engine
                .classify_intent(&IntentRequest::from_text(text))
                .await
                .unwrap();
            let confidence = response.recognized_intent.confidence;
            assert!((0.0..=1.0).contains(&confidence), "{text}");
            assert!(response.contextual_factors.all_in_bounds());
        }
    }

    #[test]
    fn ties_resolve_by_candidate_order() {
        let state = EngineState::build(RoutingConfig::default()).unwrap();
        let mut tied = ServiceScores::new();
        tied.insert(ServiceName::from("payment-processing-service"), 0.5);
        tied.insert(ServiceName::from("user-authentication-service"), 0.5);
        let factors = ContextualFactors {
            user_profile: 0.5,
            request_metadata: 0.5,
            system_state: 0.5,
            temporal_context: 0.5,
            business_logic: 0.5,
        };
        let fused = fuse_scores(&state, &[(&tied, 1.0)], &factors);
        let (winner, _) = select(&fused).unwrap();
        // `authentication` precedes `payment` in the category table, so its
        // target wins the tie regardless of score-map order.
        assert_eq!(
            winner,
            ServiceName::from("user-authentication-service")
        );
    }

    #[test]
    fn multiplier_scales_around_the_neutral_point() {
        let state = EngineState::build(RoutingConfig::default()).unwrap();
        let mut scores = ServiceScores::new();
        scores.insert(ServiceName::from("search-service"), 0.5);
        let neutral = ContextualFactors {
            user_profile: 0.5,
            request_metadata: 0.5,
            system_state: 0.5,
            temporal_context: 0.5,
            business_logic: 0.5,
        };
        let boosted = ContextualFactors {
            user_profile: 1.0,
            request_metadata: 1.0,
            system_state: 1.0,
            temporal_context: 1.0,
            business_logic: 1.0,
        };
        let base = fuse_scores(&state, &[(&scores, 1.0)], &neutral);
        let high = fuse_scores(&state, &[(&scores, 1.0)], &boosted);
        let score_of = |fused: &[(ServiceName, f64)]| {
            fused
                .iter()
                .find(|(name, _)| name.as_str() == "search-service")
                .map(|(_, score)| *score)
                .unwrap()
        };
        assert!((score_of(&base) - 0.5).abs() < 1e-9);
        // 0.5 * (1 + 0.5 * 0.4) = 0.6
        assert!((score_of(&high) - 0.6).abs() < 1e-9);
    }
}
