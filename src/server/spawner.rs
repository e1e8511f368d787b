// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::push::PushDeliveryTask;
use crate::core::registry::sweeper::RegistrySweeperTask;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all critical background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    let server_init = ctx
        .init_channels
        .take()
        .ok_or_else(|| anyhow!("Server init channels already consumed"))?;

    let config_clone = server_state.config.lock().await.clone();

    // --- Metrics Server ---
    if config_clone.metrics.enabled {
        let metrics_state = server_state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Registry sweep ---
    let sweeper = RegistrySweeperTask::new(
        server_state.clone(),
        config_clone.registry.sweep_interval,
        config_clone.registry.sweep_lock_timeout,
    );
    let shutdown_rx_sweep = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx_sweep).await;
        Ok(())
    });

    // --- Push delivery worker pool ---
    let delivery = PushDeliveryTask::new(
        server_state.clone(),
        server_init.push_job_rx,
        config_clone.push.workers,
    );
    let shutdown_rx_push = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        delivery.run(shutdown_rx_push).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
