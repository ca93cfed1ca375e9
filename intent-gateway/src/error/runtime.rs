use displaydoc::Display;
use thiserror::Error;

use super::init::InitError;

/// Errors surfaced by long-running services registered with meltdown.
#[derive(Debug, Error, Display)]
pub enum RuntimeError {
    /// initialization error: {0}
    Init(#[from] InitError),
    /// server error: {0}
    Serve(std::io::Error),
    /// health monitor error: {0}
    HealthMonitor(String),
}
