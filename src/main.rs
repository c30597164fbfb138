//! Neon Grid Server
//!
//! Loads configuration, opens the durable store and serves WebSocket
//! clients until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use neon_grid::persistence::open_store;
use neon_grid::{Config, GameServer, CONFIG_PATH_ENV, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            Config::from_json_file(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        None => Config::from_env().context("reading config from environment")?,
    };
    config.game.validate().context("invalid game config")?;

    info!("Neon Grid Server v{}", VERSION);
    info!(
        "Grid: {}x{}, {} core zones, round {}s",
        config.game.grid_width,
        config.game.grid_height,
        config.game.core_zone_count,
        config.game.round_duration_ms / 1000
    );

    let store = open_store(config.server.data_dir.as_deref());

    let server = Arc::new(GameServer::new(config, store));
    info!("Grid seed: {}", hex::encode(server.seed().to_le_bytes()));

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
