//! Headless presence host.
//!
//! Loads the config, opens the SQLite store, restores the lifecycle and runs
//! the scheduler loop until Ctrl-C. Outputs are only logged; a chat-platform
//! integration drives the same [`presence::LifecycleClient`] in-process.

use presence::lifecycle::TracingOutputHandler;
use presence::logging::init_tracing;
use presence::{LifecycleController, PresenceConfig, SqliteStore, SystemClock, lifecycle_channel};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REQUEST_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = PresenceConfig::default_config_path();
    let config = if config_path.exists() {
        PresenceConfig::from_file(&config_path)?
    } else {
        PresenceConfig::default()
    };
    config.validate()?;

    let _log_guard = init_tracing(&config.logging)?;
    tracing::info!(config = %config_path.display(), "presence-host starting");

    let store = Arc::new(SqliteStore::open(&config.storage.db_path)?);
    let mut controller = LifecycleController::new(
        &config,
        store,
        Arc::new(SystemClock),
        Arc::new(TracingOutputHandler),
    )?;
    controller.initialize().await.map_err(|e| {
        tracing::error!(error = %e, "lifecycle initialization failed");
        anyhow::anyhow!("presence-host failed: {e}")
    })?;
    tracing::info!(state = ?controller.get_state(), "lifecycle restored");

    let (client, server) = lifecycle_channel(REQUEST_CAPACITY, controller);
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    drop(client);
    server_task.await?;

    tracing::info!("presence-host shut down cleanly");
    Ok(())
}
