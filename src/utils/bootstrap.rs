//! Bootstrap utilities for the waymark binary.

use std::future::Future;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with WAYMARK_LOG environment variable.
///
/// Defaults to "info" level if WAYMARK_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl-C, then run the shutdown future.
pub async fn run_until_ctrl_c<F, Fut>(shutdown: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal, shutting down"),
    }
    shutdown().await;
}
