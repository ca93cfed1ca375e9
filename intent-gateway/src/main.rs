use std::path::PathBuf;

use clap::Parser;
use intent_gateway::{
    app::App,
    config::Config,
    error::runtime::RuntimeError,
    registry::monitor::HealthMonitor,
    session::SessionReaper,
    utils::meltdown::{ShutdownSignals, TaggedService},
};
use meltdown::Meltdown;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Path to the default config file.
    /// Configs in this file can be overridden by environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let mut config = match Config::try_read(args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to read config: {error}");
            std::process::exit(1);
        }
    };

    if args.verbose {
        config.logging.level = "info,intent_gateway=trace".to_string();
    }

    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    #[cfg(debug_assertions)]
    tracing::warn!("running in debug mode");

    config.validate().inspect_err(|e| {
        tracing::error!(error = %e, "configuration validation failed");
    })?;

    let app = App::new(config).await?;
    let health_monitor = HealthMonitor::new(app.state.clone());
    let session_reaper = SessionReaper::new(app.state.0.sessions.clone());

    let tasks = [
        "shutdown-signals",
        "gateway",
        "health-monitor",
        "session-reaper",
    ];
    let mut meltdown = Meltdown::new()
        .register(TaggedService::new("shutdown-signals", ShutdownSignals))
        .register(TaggedService::new("gateway", app))
        .register(TaggedService::new("health-monitor", health_monitor))
        .register(TaggedService::new("session-reaper", session_reaper));

    info!(tasks = ?tasks, "starting services");

    let mut shutting_down = false;
    while let Some((service, result)) = meltdown.next().await {
        match result {
            Ok(()) => info!(%service, "service stopped successfully"),
            Err(error) => tracing::error!(%service, %error, "service crashed"),
        }

        if !shutting_down {
            info!("propagating shutdown signal...");
            meltdown.trigger();
            shutting_down = true;
        }
    }

    println!("shut down");

    Ok(())
}
