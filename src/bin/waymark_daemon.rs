//! waymark-daemon: asynchronous projection daemon
//!
//! Keeps the configured built-in projections in sync with the event log.
//!
//! ## Architecture
//! ```text
//! [events table] --> [high-water tracker] --> [shard workers] --> [documents + progress]
//!                                                   ^
//!                                   [node coordinator: solo / hot-cold lease]
//! ```
//!
//! ## Configuration
//! - First argument or WAYMARK_CONFIG: path to a YAML config file
//! - WAYMARK__SECTION__FIELD: per-field overrides
//! - WAYMARK_LOG: tracing filter (default: info)

use std::sync::Arc;

use backon::Retryable;
use tracing::{error, info, warn};

use waymark::config::Config;
use waymark::coordination::NodeCoordinator;
use waymark::daemon::ProjectionDaemon;
use waymark::projections::{builtin, BUILTIN_NAMES};
use waymark::storage::init_storage;
use waymark::utils::bootstrap::{init_tracing, run_until_ctrl_c};
use waymark::utils::retry::connection_backoff;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    config.validate()?;

    let storage = (|| async { init_storage(&config.storage).await })
        .retry(connection_backoff())
        .notify(|err, dur| {
            warn!(error = %err, retry_in = ?dur, "Storage not reachable, retrying");
        })
        .await?;

    let mut builder = ProjectionDaemon::builder(storage.clone()).config(config.daemon.clone());
    for name in &config.projections {
        match builtin(name) {
            Some(definition) => builder = builder.projection(definition),
            None => {
                error!(projection = %name, known = ?BUILTIN_NAMES, "Unknown built-in projection");
                return Err(format!("unknown projection: {}", name).into());
            }
        }
    }
    let daemon = Arc::new(builder.build()?);

    let coordinator =
        NodeCoordinator::new(daemon.clone(), storage.lease.clone(), config.node.clone()).spawn();
    info!(
        node = %config.node.node_id,
        mode = ?config.node.mode,
        projections = config.projections.len(),
        "waymark-daemon started"
    );

    run_until_ctrl_c(|| async {
        coordinator.shutdown().await;
        if let Err(e) = daemon.shutdown().await {
            warn!(error = %e, "Daemon shutdown failed");
        }
    })
    .await;

    info!("waymark-daemon stopped");
    Ok(())
}
