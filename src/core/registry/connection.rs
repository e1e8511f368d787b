// src/core/registry/connection.rs

//! Per-connection server-side state.

use crate::core::ZirconDBError;
use crate::core::auth::{ParsedToken, TokenHash};
use crate::core::database::DatabaseSession;
use crate::core::protocol::{RequestFlags, ServerMessage};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

/// Mutable per-connection statistics, kept behind a short-lived lock so the
/// sweep and monitoring can read them without touching the request lock.
#[derive(Debug)]
pub struct ConnectionStats {
    pub requests: u64,
    pub last_command: Option<&'static str>,
    pub last_flags: RequestFlags,
    pub created: Instant,
    pub last_activity: Instant,
}

impl ConnectionStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            requests: 0,
            last_command: None,
            last_flags: RequestFlags::empty(),
            created: now,
            last_activity: now,
        }
    }
}

/// The signed token bound to a connection plus its derived session key.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub parsed: ParsedToken,
    pub raw: Bytes,
    pub hash: TokenHash,
}

/// What the connection's request lock protects: the optional bound database
/// session. Holding the lock guard IS owning the session; no other execution
/// context can touch it while a request is in flight.
#[derive(Default)]
pub struct SessionSlot {
    pub database: Option<DatabaseSession>,
}

/// Server-side state for one network transport instance.
///
/// The transport is reached only through the push sender (asynchronous
/// writes) and the interrupt channel (soft kill); the socket itself lives in
/// the connection handler task.
pub struct ServerConnection {
    pub id: u64,
    pub addr: SocketAddr,
    push_tx: mpsc::Sender<ServerMessage>,
    interrupt_tx: broadcast::Sender<()>,
    pub stats: Mutex<ConnectionStats>,
    token: RwLock<Option<TokenState>>,
    token_based: AtomicBool,
    closed: AtomicBool,
    request_lock: tokio::sync::Mutex<SessionSlot>,
}

impl ServerConnection {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        push_tx: mpsc::Sender<ServerMessage>,
        interrupt_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            id,
            addr,
            push_tx,
            interrupt_tx,
            stats: Mutex::new(ConnectionStats::new()),
            token: RwLock::new(None),
            token_based: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            request_lock: tokio::sync::Mutex::new(SessionSlot::default()),
        }
    }

    /// Acquires the request lock, serializing request processing on this
    /// connection. Not reentrant: a task holding the guard must not call
    /// this again.
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, SessionSlot> {
        self.request_lock.lock().await
    }

    /// Bounded, non-blocking acquire used by the sweep so a slow in-flight
    /// request never stalls cleanup of other connections.
    pub async fn try_acquire_for_sweep(
        &self,
        timeout: Duration,
    ) -> Option<tokio::sync::MutexGuard<'_, SessionSlot>> {
        tokio::time::timeout(timeout, self.request_lock.lock())
            .await
            .ok()
    }

    /// Non-blocking acquire for synchronous teardown paths. Fails when a
    /// request (or the sweep) currently owns the slot; the caller then
    /// leaves release to the owner.
    pub fn request_lock_for_teardown(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, SessionSlot>, tokio::sync::TryLockError> {
        self.request_lock.try_lock()
    }

    /// True once the handler task dropped its receiver, i.e. the socket is
    /// closed or half-shut.
    pub fn transport_closed(&self) -> bool {
        self.push_tx.is_closed()
    }

    /// Writes a push message to the transport, bounded by `timeout`. Any
    /// failure means the connection is dead or hopelessly backed up.
    pub async fn send_push(
        &self,
        message: ServerMessage,
        timeout: Duration,
    ) -> Result<(), ZirconDBError> {
        tokio::time::timeout(timeout, self.push_tx.send(message))
            .await
            .map_err(|_| ZirconDBError::Internal("push write timed out".to_string()))?
            .map_err(|_| ZirconDBError::Internal("push channel closed".to_string()))
    }

    /// Fires the soft-interrupt signal towards the handler task.
    pub fn interrupt(&self) {
        let _ = self.interrupt_tx.send(());
    }

    pub fn bind_token(&self, state: TokenState) {
        *self.token.write() = Some(state);
        self.token_based.store(true, Ordering::SeqCst);
    }

    pub fn token_state(&self) -> Option<TokenState> {
        self.token.read().clone()
    }

    pub fn is_token_based(&self) -> bool {
        self.token_based.load(Ordering::SeqCst)
    }

    /// Flips the closed flag; only the first caller gets `true`, which makes
    /// disconnect idempotent across the sweep and request paths.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Records one dispatched request in the connection stats.
    pub fn record_request(&self, name: &'static str, flags: RequestFlags) {
        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.last_command = Some(name);
        stats.last_flags = flags;
        stats.last_activity = Instant::now();
    }

    /// True when the last dispatched command may be interrupted mid-flight.
    pub fn last_command_idempotent(&self) -> bool {
        let stats = self.stats.lock();
        stats.last_command.is_none() || stats.last_flags.contains(RequestFlags::IDEMPOTENT)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("token_based", &self.is_token_based())
            .field("closed", &self.is_closed())
            .finish()
    }
}
