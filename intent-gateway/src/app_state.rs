use std::sync::Arc;

use crate::{
    classify::IntentEngine, config::Config, manifest::refresher::ManifestRefresher,
    registry::ServiceRegistry, router::meta::MetaRouter, session::SessionBus,
};

#[derive(Clone)]
pub struct AppState(pub Arc<InnerAppState>);

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.config
    }
}

/// Stateful collaborators shared across the application. Everything is an
/// explicit field here; no component reaches for globals.
pub struct InnerAppState {
    pub config: Config,
    pub registry: Arc<ServiceRegistry>,
    pub engine: Arc<IntentEngine>,
    pub router: MetaRouter,
    pub refresher: ManifestRefresher,
    pub sessions: Arc<SessionBus>,
}
