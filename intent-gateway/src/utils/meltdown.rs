use std::future::Future;

use futures::future::BoxFuture;
use meltdown::Token;

use crate::error::runtime::RuntimeError;

/// Wraps a service so the meltdown loop can report which task finished.
pub struct TaggedService<S> {
    name: &'static str,
    service: S,
}

impl<S> TaggedService<S> {
    pub fn new(name: &'static str, service: S) -> Self {
        Self { name, service }
    }
}

impl<S, T> meltdown::Service for TaggedService<S>
where
    S: meltdown::Service + Send + 'static,
    S::Future: Future<Output = T> + Send,
    T: Send + 'static,
{
    type Future = BoxFuture<'static, (&'static str, T)>;

    fn run(self, token: Token) -> Self::Future {
        let Self { name, service } = self;
        let future = service.run(token);
        Box::pin(async move { (name, future.await) })
    }
}

/// Resolves once SIGTERM/SIGINT arrives, triggering the shared token so
/// every registered service winds down.
pub struct ShutdownSignals;

impl meltdown::Service for ShutdownSignals {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, mut token: Token) -> Self::Future {
        Box::pin(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                )
                .map_err(RuntimeError::Serve)?;
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    () = &mut token => return Ok(()),
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c"),
                    () = &mut token => return Ok(()),
                }
            }
            token.trigger();
            Ok(())
        })
    }
}
