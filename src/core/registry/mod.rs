// src/core/registry/mod.rs

//! The connection registry: every live connection keyed by a server-assigned
//! id, plus the secondary index from token hash to session.

mod connection;
mod session;
pub mod sweeper;

pub use connection::{ConnectionStats, ServerConnection, SessionSlot, TokenState};
pub use session::ClientSession;

use crate::core::ZirconDBError;
use crate::core::auth::{ParsedToken, SignedTokenHandler, TokenHash};
use crate::core::metrics;
use crate::core::protocol::ServerMessage;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Owns the set of live connections and the token-hash → session index.
/// Individual map operations are lock-free for callers; the per-connection
/// request lock is a separate concern handled by `ServerConnection`.
pub struct ConnectionRegistry {
    connections: DashMap<u64, Arc<ServerConnection>>,
    sessions: DashMap<TokenHash, Arc<ClientSession>>,
    connection_serial: AtomicU64,
    token_handler: Arc<SignedTokenHandler>,
}

impl ConnectionRegistry {
    pub fn new(token_handler: Arc<SignedTokenHandler>) -> Self {
        Self {
            connections: DashMap::new(),
            sessions: DashMap::new(),
            connection_serial: AtomicU64::new(0),
            token_handler,
        }
    }

    /// Creates and registers a connection with the next id. Ids are unique
    /// and strictly increasing for the registry's lifetime.
    pub fn connect(
        &self,
        addr: SocketAddr,
        push_tx: mpsc::Sender<ServerMessage>,
        interrupt_tx: broadcast::Sender<()>,
    ) -> Arc<ServerConnection> {
        let id = self.connection_serial.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Arc::new(ServerConnection::new(id, addr, push_tx, interrupt_tx));
        self.connections.insert(id, connection.clone());
        metrics::CONNECTED_CLIENTS.inc();
        debug!("Remote client connected from: {}", addr);
        connection
    }

    /// Validates a token and binds it to an already-registered connection,
    /// attaching the connection to the token's session (created on first
    /// use). The attach happens under the session map's entry lock, so a
    /// concurrent detach of the session's last other member can never
    /// observe an empty set and drop the session mid-swap.
    pub fn attach_token(
        &self,
        connection: &Arc<ServerConnection>,
        token_bytes: Bytes,
    ) -> Result<ParsedToken, ZirconDBError> {
        let parsed = self.token_handler.parse_and_validate(&token_bytes)?;
        let hash = TokenHash::of(&token_bytes);
        let previous = connection.token_state();
        self.sessions
            .entry(hash)
            .or_insert_with(|| Arc::new(ClientSession::new(token_bytes.clone())))
            .add_connection(connection.id);
        connection.bind_token(TokenState {
            parsed: parsed.clone(),
            raw: token_bytes,
            hash,
        });
        // Re-binding (e.g. open after connect) migrates the connection out
        // of its old session; the new membership is in place first.
        if let Some(previous) = previous
            && previous.hash != hash
        {
            if let Some(session) = self.session_for_hash(&previous.hash) {
                session.remove_connection(connection.id);
            }
            self.sessions
                .remove_if(&previous.hash, |_, s| !s.is_active());
        }
        Ok(parsed)
    }

    /// Attaches a token to a brand-new connection: the reconnection path.
    /// The new connection joins the existing session (or a fresh one) before
    /// any old connection for the same token is torn down.
    pub fn reconnect(
        &self,
        addr: SocketAddr,
        push_tx: mpsc::Sender<ServerMessage>,
        interrupt_tx: broadcast::Sender<()>,
        token_bytes: Bytes,
    ) -> Result<(Arc<ServerConnection>, ParsedToken), ZirconDBError> {
        let connection = self.connect(addr, push_tx, interrupt_tx);
        match self.attach_token(&connection, token_bytes) {
            Ok(parsed) => Ok((connection, parsed)),
            Err(e) => {
                // Never leave a half-authenticated connection registered.
                self.remove(connection.id);
                Err(e)
            }
        }
    }

    pub fn lookup(&self, id: u64) -> Option<Arc<ServerConnection>> {
        self.connections.get(&id).map(|e| e.value().clone())
    }

    pub fn has(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<u64> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn session_for_hash(&self, hash: &TokenHash) -> Option<Arc<ClientSession>> {
        self.sessions.get(hash).map(|e| e.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes a connection from the registry and from its session. The
    /// session goes away the instant its connection set becomes empty.
    /// Idempotent: the atomic closed flag makes a second remove a no-op, so
    /// the sweep and the request path can race without double-closing.
    pub fn remove(&self, id: u64) -> Option<Arc<ServerConnection>> {
        let (_, connection) = self.connections.remove(&id)?;
        if !connection.mark_closed() {
            return None;
        }
        metrics::CONNECTED_CLIENTS.dec();
        if let Some(token) = connection.token_state() {
            if let Some(session) = self.session_for_hash(&token.hash) {
                session.remove_connection(id);
            }
            self.sessions.remove_if(&token.hash, |_, s| !s.is_active());
        }
        debug!("Disconnected connection with id={}", id);
        Some(connection)
    }

    pub fn token_handler(&self) -> &Arc<SignedTokenHandler> {
        &self.token_handler
    }
}
