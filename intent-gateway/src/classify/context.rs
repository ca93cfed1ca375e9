//! Contextual factors: per-request signals in `[0, 1]`, scaled by their
//! configured weights before entering the fusion multiplier.

use indexmap::IndexMap;

use crate::{
    config::routing::ContextualFactorConfig,
    types::{request::IntentRequest, response::ContextualFactors},
};

pub const BUSINESS_HOURS: std::ops::Range<u32> = 9..17;

#[must_use]
pub fn compute(
    request: &IntentRequest,
    healthy_services: usize,
    weights: &IndexMap<String, ContextualFactorConfig>,
    local_hour: u32,
) -> ContextualFactors {
    let weight = |name: &str| -> f64 {
        weights.get(name).map_or(1.0, |factor| factor.weight)
    };
    let scaled = |name: &str, base: f64| -> f64 {
        (base * weight(name)).clamp(0.0, 1.0)
    };

    let has_user = request
        .context
        .as_ref()
        .is_some_and(|context| context.user_id.is_some());
    let has_headers = request
        .headers
        .as_ref()
        .is_some_and(|headers| !headers.is_empty());
    let in_business_hours = BUSINESS_HOURS.contains(&local_hour);

    ContextualFactors {
        user_profile: scaled("userProfile", if has_user { 0.7 } else { 0.5 }),
        request_metadata: scaled(
            "requestMetadata",
            if has_headers { 0.6 } else { 0.5 },
        ),
        system_state: scaled(
            "systemState",
            if healthy_services > 5 { 0.8 } else { 0.4 },
        ),
        temporal_context: scaled(
            "temporalContext",
            if in_business_hours { 0.9 } else { 0.4 },
        ),
        business_logic: scaled("businessLogic", 0.75),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::routing::RoutingConfig, types::request::RequestContext,
    };

    fn weights() -> IndexMap<String, ContextualFactorConfig> {
        RoutingConfig::default().contextual_factors
    }

    #[test]
    fn user_presence_raises_the_profile_factor() {
        let anonymous = IntentRequest::from_text("hello");
        let factors = compute(&anonymous, 0, &weights(), 10);
        assert!((factors.user_profile - 0.5).abs() < 1e-9);

        let known = IntentRequest {
            context: Some(RequestContext {
                user_id: Some("user-987".to_string()),
                ..RequestContext::default()
            }),
            ..anonymous
        };
        let factors = compute(&known, 0, &weights(), 10);
        assert!((factors.user_profile - 0.7).abs() < 1e-9);
    }

    #[test]
    fn business_hours_flip_the_temporal_factor() {
        let request = IntentRequest::from_text("hello");
        let day = compute(&request, 0, &weights(), 12);
        let night = compute(&request, 0, &weights(), 3);
        assert!((day.temporal_context - 0.9).abs() < 1e-9);
        assert!((night.temporal_context - 0.4).abs() < 1e-9);
    }

    #[test]
    fn system_state_tracks_healthy_service_count() {
        let request = IntentRequest::from_text("hello");
        assert!(
            (compute(&request, 6, &weights(), 12).system_state - 0.8).abs()
                < 1e-9
        );
        assert!(
            (compute(&request, 5, &weights(), 12).system_state - 0.4).abs()
                < 1e-9
        );
    }

    #[test]
    fn weights_scale_and_clamp() {
        let mut weights = weights();
        weights.insert(
            "businessLogic".to_string(),
            ContextualFactorConfig {
                weight: 2.0,
                factors: vec![],
            },
        );
        let request = IntentRequest::from_text("hello");
        let factors = compute(&request, 0, &weights, 12);
        // 0.75 * 2.0 clamps to 1.0
        assert!((factors.business_logic - 1.0).abs() < 1e-9);
        assert!(factors.all_in_bounds());
    }
}
