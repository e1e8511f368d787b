// src/server/mod.rs

use crate::config::Config;
use crate::core::settings::LogReloadHandle;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;
mod stream;

pub use stream::AnyStream;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config, log_reload_handle: LogReloadHandle) -> Result<()> {
    // 1. Initialize server state, listener, TLS, etc.
    let mut server_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Start the main connection acceptance loop. This function will run until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
