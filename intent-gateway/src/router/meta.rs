//! The meta-router: classify, pick the downstream target, and forward or
//! simulate the call under circuit-breaker protection.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::json;

use super::{
    breaker::{Admission, CircuitBreaker},
    metrics::RoutingMetrics,
};
use crate::{
    classify::IntentEngine,
    config::router::RouterConfig,
    error::{api::ApiError, init::InitError},
    metrics as prom,
    registry::ServiceRegistry,
    types::{request::IntentRequest, response::IntentResponse},
};

/// What the router hands back to the HTTP surface: the classification plus
/// the downstream (or synthesized) response.
#[derive(Debug)]
pub struct RoutedOutcome {
    pub intent: IntentResponse,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct MetaRouter {
    engine: Arc<IntentEngine>,
    registry: Arc<ServiceRegistry>,
    pub metrics: RoutingMetrics,
    breaker: CircuitBreaker,
    http: reqwest::Client,
    config: RouterConfig,
}

impl MetaRouter {
    pub fn new(
        engine: Arc<IntentEngine>,
        registry: Arc<ServiceRegistry>,
        config: RouterConfig,
    ) -> Result<Self, InitError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            engine,
            registry,
            metrics: RoutingMetrics::default(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            http,
            config,
        })
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Classify and dispatch under the breaker. Open circuit short-circuits
    /// with 503 before any classification work happens.
    pub async fn route(
        &self,
        request: &IntentRequest,
    ) -> Result<RoutedOutcome, ApiError> {
        match self.breaker.admit() {
            Admission::Rejected { retry_after } => {
                return Err(ApiError::BreakerOpen {
                    retry_after_secs: retry_after.as_secs().max(1),
                });
            }
            Admission::Allowed { .. } => {}
        }

        let started = Instant::now();
        let dispatched = tokio::time::timeout(
            self.config.breaker.call_timeout,
            self.dispatch(request),
        )
        .await;

        match dispatched {
            Ok(Ok((outcome, forward_ok))) => {
                self.breaker.record(forward_ok);
                self.observe(&outcome, started);
                Ok(outcome)
            }
            // Validation never reaches the downstream, so it does not
            // count against the breaker window.
            Ok(Err(error @ ApiError::Validation(_))) => Err(error),
            Ok(Err(error)) => {
                self.breaker.record(false);
                Err(error)
            }
            Err(_elapsed) => {
                self.breaker.record(false);
                Err(ApiError::UpstreamTimeout(
                    "routing deadline exceeded".to_string(),
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        request: &IntentRequest,
    ) -> Result<(RoutedOutcome, bool), ApiError> {
        let intent = self.engine.classify_intent(request).await?;
        let target = intent.routing.target_service.clone();

        if !self.config.forward_enabled {
            let body = json!({
                "simulated": true,
                "targetService": target,
                "intent": intent,
            });
            let outcome = RoutedOutcome {
                intent,
                status: StatusCode::OK,
                headers: json_headers(),
                body: Bytes::from(body.to_string()),
            };
            return Ok((outcome, true));
        }

        let descriptor = self
            .registry
            .get_descriptor(&target)
            .ok_or_else(|| {
                ApiError::NotFound(format!("service `{target}`"))
            })?
            .clone();

        let method = request
            .http_method
            .as_deref()
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(Method::POST);
        let mut url = descriptor.url.to_string();
        if let Some(path) = request.http_path.as_deref() {
            url = format!(
                "{}{}",
                url.trim_end_matches('/'),
                path
            );
        }

        let mut builder = self
            .http
            .request(method, url)
            .timeout(std::time::Duration::from_millis(
                descriptor.timeout_millis,
            ));
        for (name, value) in request.headers.iter().flatten() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                let status = StatusCode::from_u16(response.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let headers = copy_string_headers(response.headers());
                let body =
                    response.bytes().await.unwrap_or_else(|_| Bytes::new());
                let outcome = RoutedOutcome {
                    intent,
                    status,
                    headers,
                    body,
                };
                Ok((outcome, true))
            }
            Err(error) => {
                tracing::warn!(
                    service = %target,
                    error = %error,
                    "downstream forward failed"
                );
                let body = json!({
                    "error": "downstream call failed",
                    "targetService": target,
                });
                let outcome = RoutedOutcome {
                    intent,
                    status: StatusCode::GATEWAY_TIMEOUT,
                    headers: json_headers(),
                    body: Bytes::from(body.to_string()),
                };
                Ok((outcome, false))
            }
        }
    }

    fn observe(&self, outcome: &RoutedOutcome, started: Instant) {
        #[allow(clippy::cast_precision_loss)]
        let elapsed_millis = started.elapsed().as_millis() as f64;
        let service = &outcome.intent.routing.target_service;
        let intent = &outcome.intent.recognized_intent.category;
        self.metrics.record(
            service,
            outcome.intent.recognized_intent.confidence,
            elapsed_millis,
        );
        prom::record_request(
            service.as_str(),
            intent,
            outcome.status.as_u16(),
        );
        prom::record_latency(
            service.as_str(),
            intent,
            elapsed_millis / 1000.0,
        );
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers
}

/// Only string-representable downstream headers cross the boundary;
/// hop-by-hop framing is dropped so hyper can re-frame the body.
fn copy_string_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in source {
        if name == http::header::TRANSFER_ENCODING
            || name == http::header::CONNECTION
            || name == http::header::CONTENT_LENGTH
        {
            continue;
        }
        if value.to_str().is_ok()
            && let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes())
        {
            headers.insert(name, value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classify::gemini::LlmClassifier,
        config::{
            cache::CacheConfig, llm::LlmConfig, registry::RegistryConfig,
            router::BreakerConfig, routing::RoutingConfig,
        },
    };

    fn router(config: RouterConfig) -> MetaRouter {
        let registry = Arc::new(
            ServiceRegistry::new(&RegistryConfig::default()).unwrap(),
        );
        let engine = Arc::new(
            IntentEngine::new(
                RoutingConfig::default(),
                LlmClassifier::new(&LlmConfig::default()).unwrap(),
                crate::cache::ResponseCache::from_config(
                    &CacheConfig::default(),
                ),
                registry.clone(),
            )
            .unwrap(),
        );
        MetaRouter::new(engine, registry, config).unwrap()
    }

    #[tokio::test]
    async fn simulation_mode_returns_ok_with_the_classification() {
        let router = router(RouterConfig::default());
        let outcome = router
            .route(&IntentRequest::from_text("reset my password"))
            .await
            .unwrap();
        assert_eq!(outcome.status, StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&outcome.body).unwrap();
        assert_eq!(body["simulated"], true);
        assert_eq!(body["targetService"], "user-authentication-service");
    }

    #[tokio::test]
    async fn forward_failures_trip_the_breaker_and_reject_fast() {
        // Forwarding on, but every default descriptor points at an
        // unresolvable host, so each dispatch fails with 504.
        let config = RouterConfig {
            forward_enabled: true,
            breaker: BreakerConfig {
                window_size: 10,
                minimum_requests: 3,
                error_threshold_percent: 50,
                call_timeout: std::time::Duration::from_secs(30),
                reset_timeout: std::time::Duration::from_secs(30),
            },
        };
        let router = router(config);
        for i in 0..10 {
            let request = IntentRequest::from_text(format!(
                "reset my password please {i}"
            ));
            match router.route(&request).await {
                Ok(outcome) => {
                    assert_eq!(outcome.status, StatusCode::GATEWAY_TIMEOUT);
                }
                Err(ApiError::BreakerOpen { .. }) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        let started = Instant::now();
        let error = router
            .route(&IntentRequest::from_text("one more"))
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::BreakerOpen { .. }));
        // Short-circuit means no classification and no network.
        assert!(started.elapsed() < std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn validation_errors_do_not_count_against_the_window() {
        let router = router(RouterConfig::default());
        for _ in 0..10 {
            let error = router
                .route(&IntentRequest::default())
                .await
                .unwrap_err();
            assert!(matches!(error, ApiError::Validation(_)));
        }
        assert_eq!(
            router.breaker().state(),
            super::super::breaker::CircuitState::Closed
        );
    }

    #[test]
    fn string_headers_are_copied_and_framing_dropped() {
        let mut source = HeaderMap::new();
        source.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        source.insert(
            http::header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        source.insert(
            HeaderName::from_static("x-downstream"),
            HeaderValue::from_static("yes"),
        );
        let copied = copy_string_headers(&source);
        assert!(copied.contains_key(http::header::CONTENT_TYPE));
        assert!(copied.contains_key("x-downstream"));
        assert!(!copied.contains_key(http::header::TRANSFER_ENCODING));
    }
}
