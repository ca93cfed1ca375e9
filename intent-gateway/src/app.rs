use std::{net::SocketAddr, sync::Arc};

use futures::future::BoxFuture;
use meltdown::Token;
use tracing::info;

use crate::{
    app_state::{AppState, InnerAppState},
    cache::ResponseCache,
    classify::{IntentEngine, gemini::LlmClassifier},
    config::{Config, routing::RoutingConfig},
    endpoints,
    error::{init::InitError, runtime::RuntimeError},
    manifest::{refresher::ManifestRefresher, repository::ManifestRepository},
    metrics,
    registry::ServiceRegistry,
    router::meta::MetaRouter,
    session::SessionBus,
    telemetry::SyntheticTelemetry,
};

/// The assembled application: shared state plus the HTTP router. Running it
/// (via meltdown) binds the server and serves until shutdown.
pub struct App {
    pub state: AppState,
    router: axum::Router,
}

impl App {
    pub async fn new(config: Config) -> Result<Self, InitError> {
        tracing::debug!("creating app");
        let state = Self::build_app_state(config)?;
        let router = endpoints::router(state.clone());
        Ok(Self { state, router })
    }

    /// Wire up every stateful collaborator: registry, classifier chain,
    /// cache, engine, router, and the manifest subsystem.
    fn build_app_state(config: Config) -> Result<AppState, InitError> {
        metrics::install_default_exporter()?;

        let registry = Arc::new(ServiceRegistry::new(&config.registry)?);
        let routing = RoutingConfig::load(config.config_dir.as_deref())
            .map_err(|e| InitError::Config(Box::new(e)))?;
        let classifier = LlmClassifier::new(&config.llm)?;
        let cache = ResponseCache::from_config(&config.cache);
        let engine = Arc::new(IntentEngine::new(
            routing,
            classifier,
            cache,
            registry.clone(),
        )?);
        let router = MetaRouter::new(
            engine.clone(),
            registry.clone(),
            config.router.clone(),
        )?;

        let repository = Arc::new(ManifestRepository::new(
            config.manifest.dir.clone(),
            config.manifest.history_dir.clone(),
        ));
        let telemetry = Arc::new(SyntheticTelemetry::new(
            config.manifest.telemetry_cache_ttl,
        ));
        let refresher = ManifestRefresher::new(
            repository,
            telemetry,
            config.manifest.clone(),
        );
        let sessions = Arc::new(SessionBus::new(engine.clone()));

        Ok(AppState(Arc::new(InnerAppState {
            config,
            registry,
            engine,
            router,
            refresher,
            sessions,
        })))
    }
}

impl meltdown::Service for App {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, token: Token) -> Self::Future {
        Box::pin(async move {
            let Self { state, router } = self;
            let config = state.config();
            let addr =
                SocketAddr::from((config.server.address, config.server.port));
            let shutdown_timeout = config.server.shutdown_timeout;
            info!(address = %addr, "server starting");

            let handle = axum_server::Handle::new();
            let service = router.into_make_service();

            tokio::select! {
                biased;
                served = axum_server::bind(addr)
                    .handle(handle.clone())
                    .serve(service) => served.map_err(RuntimeError::Serve)?,
                () = token => {
                    handle.graceful_shutdown(Some(shutdown_timeout));
                }
            }
            Ok(())
        })
    }
}
