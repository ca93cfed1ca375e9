use std::time::Duration;

use futures::future::BoxFuture;
use meltdown::Token;

use crate::{app_state::AppState, error::runtime::RuntimeError};

/// Background loop refreshing the health table on a fixed cadence.
#[derive(Clone)]
pub struct HealthMonitor {
    app_state: AppState,
    interval: Duration,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(app_state: AppState) -> Self {
        let interval = app_state.config().registry.health_check_interval;
        Self {
            app_state,
            interval,
        }
    }

    async fn run_forever(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval
            .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.app_state.0.registry.refresh_all_health().await;
            tracing::trace!("health table refreshed");
        }
    }
}

impl meltdown::Service for HealthMonitor {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, mut token: Token) -> Self::Future {
        Box::pin(async move {
            tokio::select! {
                () = self.run_forever() => {}
                () = &mut token => {
                    tracing::debug!(name = "health-monitor", "task shut down successfully");
                }
            }
            Ok(())
        })
    }
}
