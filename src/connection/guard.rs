// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure registry entries are always cleaned up when a
/// connection handler's scope is exited, however it exits. One network
/// channel may carry several logical connections (connect + reopen); every
/// id bound on this channel is registered here.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    addr: SocketAddr,
    bound: Vec<u64>,
}

impl ConnectionGuard {
    pub fn new(state: Arc<ServerState>, addr: SocketAddr) -> Self {
        Self {
            state,
            addr,
            bound: Vec::new(),
        }
    }

    /// Records a connection id created on this channel.
    pub fn register(&mut self, connection_id: u64) {
        self.bound.push(connection_id);
    }

    pub fn bound_ids(&self) -> &[u64] {
        &self.bound
    }
}

impl Drop for ConnectionGuard {
    /// Performs resource cleanup when the guard goes out of scope: every
    /// connection bound on this channel leaves the registry and its
    /// session, and its push subscriptions are forgotten.
    fn drop(&mut self) {
        if self.bound.is_empty() {
            return;
        }
        debug!(
            "ConnectionGuard dropping, cleaning up {} connection(s) for {}",
            self.bound.len(),
            self.addr
        );
        for id in self.bound.drain(..) {
            self.state.disconnect_connection(id);
        }
    }
}
