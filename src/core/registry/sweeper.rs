// src/core/registry/sweeper.rs

//! The periodic registry sweep: prunes dead sockets and expired tokens.

use crate::core::metrics;
use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Background task that runs the sweep on a single timer.
pub struct RegistrySweeperTask {
    state: Arc<ServerState>,
    interval: Duration,
    lock_timeout: Duration,
}

impl RegistrySweeperTask {
    pub fn new(state: Arc<ServerState>, interval: Duration, lock_timeout: Duration) -> Self {
        Self {
            state,
            interval,
            lock_timeout,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Connection registry sweeper started (interval {:?}).",
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    sweep(&self.state, self.lock_timeout).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Connection registry sweeper shutting down.");
                    return;
                }
            }
        }
    }
}

/// One sweep pass over every registered connection.
///
/// Each connection's lock is acquired with a short timeout, never an
/// indefinite wait, so a hung request cannot stall cleanup of healthy
/// connections. A connection is removed when its transport has died, or —
/// even with a healthy-looking socket — when its token no longer validates:
/// token rot wins over socket liveness.
pub async fn sweep(state: &Arc<ServerState>, lock_timeout: Duration) {
    let registry = &state.registry;
    for id in registry.connection_ids() {
        let Some(connection) = registry.lookup(id) else {
            continue;
        };
        let Some(mut slot) = connection.try_acquire_for_sweep(lock_timeout).await else {
            // A request is in flight; leave this connection for a later pass.
            continue;
        };

        if connection.transport_closed() {
            debug!(
                "Sweep found and removed pending closed channel {} ({})",
                id, connection.addr
            );
            if connection.last_command_idempotent() {
                connection.interrupt();
            }
            slot.database.take();
            drop(slot);
            metrics::SWEEP_REMOVALS_TOTAL.inc();
            state.disconnect_connection(id);
        } else if connection.is_token_based() {
            let expired = match connection.token_state() {
                Some(token) => !registry.token_handler().validate(&token.parsed),
                None => false,
            };
            if expired {
                debug!(
                    "Sweep force-closing connection {} ({}): token no longer validates",
                    id, connection.addr
                );
                slot.database.take();
                drop(slot);
                connection.interrupt();
                metrics::SWEEP_REMOVALS_TOTAL.inc();
                state.disconnect_connection(id);
            }
        }
    }

    // Push subscribers and live monitors whose connections vanished.
    state.push.cleanup(registry);
    state.live_queries.cleanup(registry);
}
