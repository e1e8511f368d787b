// src/core/state.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use crate::config::Config;
use crate::core::ZirconDBError;
use crate::core::auth::{ServerUsers, SignedTokenHandler, UsersFile};
use crate::core::push::{PushJob, PushManager};
use crate::core::push::LiveQueryRegistry;
use crate::core::query::{QueryEngine, ScanQueryEngine};
use crate::core::registry::ConnectionRegistry;
use crate::core::settings::{LogReloadHandle, ServerSettings};
use crate::core::stats::StatsState;
use crate::core::storage::{MemoryStorageEngine, StorageEngine};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{error, info, warn};

/// Contains all initialized components required to spawn the server's background tasks.
/// This struct is created once during server initialization and then consumed by the spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// Receives fan-out jobs for the push delivery task.
    pub push_job_rx: mpsc::Receiver<PushJob>,
}

/// The central struct holding all shared, server-wide state.
/// This struct is wrapped in an `Arc` and passed to nearly every task and
/// connection handler, providing a single source of truth for the server's
/// configuration and dynamic state.
pub struct ServerState {
    /// The server's runtime configuration, wrapped in a Mutex to allow for
    /// dynamic changes.
    pub config: Arc<Mutex<Config>>,
    /// All live connections plus the token-hash → session index.
    pub registry: ConnectionRegistry,
    /// The coalescing push mailboxes and their subscribers.
    pub push: Arc<PushManager>,
    /// Live-query monitors.
    pub live_queries: LiveQueryRegistry,
    /// The storage engine, consumed through its narrow trait.
    pub storage: Arc<dyn StorageEngine>,
    /// Direct handle to the bundled engine for collaborator-only controls
    /// (offline simulation); the dispatch path never uses this.
    pub memory_storage: Arc<MemoryStorageEngine>,
    /// The query execution engine.
    pub query_engine: Arc<dyn QueryEngine>,
    /// Mints and validates signed session tokens.
    pub token_handler: Arc<SignedTokenHandler>,
    /// Server users for connect/open/shutdown authentication.
    pub users: ServerUsers,
    /// The global configuration registry.
    pub settings: ServerSettings,
    /// Server-wide statistics.
    pub stats: StatsState,
    /// Broadcast used to stop every task; the authenticated shutdown
    /// request fires it too.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration.
    /// This is the main factory function for creating the server's shared context.
    pub fn initialize(
        config: Config,
        log_reload_handle: Option<LogReloadHandle>,
    ) -> Result<ServerInit, ZirconDBError> {
        let token_ttl_ms = config.security.token_ttl.as_millis() as i64;
        let token_handler = Arc::new(match &config.security.token_secret {
            Some(secret_hex) => {
                let bytes = hex::decode(secret_hex).map_err(|e| {
                    ZirconDBError::Internal(format!("token_secret is not valid hex: {e}"))
                })?;
                let secret: [u8; 32] = bytes.try_into().map_err(|_| {
                    ZirconDBError::Internal("token_secret must be 32 bytes of hex".to_string())
                })?;
                SignedTokenHandler::new(secret, token_ttl_ms)
            }
            None => {
                info!("No token_secret configured; using a random per-process secret.");
                SignedTokenHandler::with_random_secret(token_ttl_ms)?
            }
        });

        let users = load_users(&config)?;
        if users.is_empty() {
            warn!(
                "No server users are configured. Authentication will reject every connect attempt."
            );
        }

        let (push, push_job_rx) =
            PushManager::new(config.push.queue_capacity, config.push.write_timeout);
        let push = Arc::new(push);

        let memory_storage = Arc::new(MemoryStorageEngine::new());
        // Register the push manager as the storage layer's metadata hook.
        memory_storage.set_observer(push.clone());
        let storage: Arc<dyn StorageEngine> = memory_storage.clone();
        let query_engine: Arc<dyn QueryEngine> = Arc::new(ScanQueryEngine::new(storage.clone()));

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(Self {
            config: Arc::new(Mutex::new(config)),
            registry: ConnectionRegistry::new(token_handler.clone()),
            push,
            live_queries: LiveQueryRegistry::new(),
            storage,
            memory_storage,
            query_engine,
            token_handler,
            users,
            settings: ServerSettings::new(log_reload_handle),
            stats: StatsState::new(),
            shutdown_tx,
        });

        Ok(ServerInit { state, push_job_rx })
    }

    /// Removes a connection from the registry and runs the on-disconnect
    /// callbacks: push subscriptions and live monitors are forgotten, and a
    /// bound database session (with its cursors and any lingering
    /// transaction) is released. Safe to call from any path; the removal
    /// itself is idempotent.
    pub fn disconnect_connection(&self, id: u64) {
        let Some(connection) = self.registry.remove(id) else {
            return;
        };
        self.push.forget_connection(id);
        self.live_queries.forget_connection(id);
        // Best effort: a request holding the lock will release the session
        // when its Arc drops anyway.
        if let Ok(mut slot) = connection.request_lock_for_teardown() {
            slot.database.take();
        }
    }

    /// Disconnects and interrupts the handler task, used when a security
    /// failure must tear the whole channel down.
    pub fn force_disconnect(&self, id: u64) {
        if let Some(connection) = self.registry.lookup(id) {
            connection.interrupt();
        }
        self.disconnect_connection(id);
    }
}

/// Loads the users file referenced by the configuration, tolerating a
/// missing file but failing hard on an unreadable one.
fn load_users(config: &Config) -> Result<ServerUsers, ZirconDBError> {
    let Some(path) = &config.users_file else {
        return Ok(ServerUsers::default());
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<UsersFile>(&contents) {
            Ok(loaded) => {
                info!("Successfully loaded {} server users.", loaded.users.len());
                Ok(ServerUsers::new(loaded.users))
            }
            Err(e) => {
                let err_msg = format!(
                    "Failed to parse users file '{path}': {e}. Please fix the file."
                );
                error!("{err_msg}");
                Err(ZirconDBError::Internal(err_msg))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Users file '{}' not found. Starting with no users.", path);
            Ok(ServerUsers::default())
        }
        Err(e) => {
            let err_msg = format!("Failed to read users file '{path}': {e}.");
            error!("{err_msg}");
            Err(ZirconDBError::Internal(err_msg))
        }
    }
}
