// src/core/dispatch/server_ops.rs

//! Handshake, session lifecycle, global configuration and server control.

use super::RequestExecutor;
use crate::connection::ConnectionGuard;
use crate::core::ZirconDBError;
use crate::core::auth::DatabaseKind;
use crate::core::database::DatabaseSession;
use crate::core::protocol::Response;
use crate::core::registry::{ServerConnection, SessionSlot};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// The `connect` handshake: authenticates a server user, registers a new
/// connection and hands back a server-scope token.
pub async fn connect(
    exec: &RequestExecutor,
    guard: &mut ConnectionGuard,
    username: &str,
    password: &str,
) -> Result<Response, ZirconDBError> {
    let state = exec.state();
    state.users.verify(username, password).await?;

    let connection = state
        .registry
        .connect(exec.addr(), exec.push_tx(), exec.interrupt_tx());
    let token = state.token_handler.mint("", DatabaseKind::Server)?;
    if let Err(e) = state.registry.attach_token(&connection, token.clone()) {
        state.registry.remove(connection.id);
        return Err(e);
    }
    guard.register(connection.id);
    state.stats.increment_total_connections();

    Ok(Response::Connected {
        connection_id: connection.id,
        token: token.to_vec(),
    })
}

/// Opens a database session. Without a connection id this doubles as the
/// handshake; with one it binds the session to the existing connection.
pub async fn open_database(
    exec: &RequestExecutor,
    guard: &mut ConnectionGuard,
    connection_id: Option<u64>,
    database: &str,
    username: &str,
    password: &str,
) -> Result<Response, ZirconDBError> {
    let state = exec.state();
    state.users.verify(username, password).await?;

    let connection = match connection_id {
        Some(id) => state
            .registry
            .lookup(id)
            .ok_or(ZirconDBError::UnknownConnection(id))?,
        None => {
            let connection =
                state
                    .registry
                    .connect(exec.addr(), exec.push_tx(), exec.interrupt_tx());
            guard.register(connection.id);
            state.stats.increment_total_connections();
            connection
        }
    };

    let mut slot = connection.acquire().await;
    if slot.database.is_some() {
        return Err(ZirconDBError::DatabaseAlreadyOpen);
    }

    let token = state.token_handler.mint(database, DatabaseKind::Document)?;
    if let Err(e) = state.registry.attach_token(&connection, token.clone()) {
        drop(slot);
        state.disconnect_connection(connection.id);
        return Err(e);
    }
    state.storage.open_database(database).await?;
    slot.database = Some(DatabaseSession::new(
        database.to_string(),
        state.storage.clone(),
        state.query_engine.clone(),
    ));
    info!(
        "{}: opened database '{}' on connection {}",
        exec.addr(),
        database,
        connection.id
    );

    Ok(Response::DatabaseOpened {
        connection_id: connection.id,
        token: token.to_vec(),
    })
}

/// Re-attaches a token to a brand-new connection on this channel. The new
/// connection joins the token's session before any old connection for the
/// same token is swept away, so the session never flickers out of existence
/// under concurrent reopen attempts.
pub async fn reopen(
    exec: &RequestExecutor,
    guard: &mut ConnectionGuard,
    token: Vec<u8>,
) -> Result<Response, ZirconDBError> {
    let state = exec.state();
    let token = Bytes::from(token);
    let (connection, parsed) = state.registry.reconnect(
        exec.addr(),
        exec.push_tx(),
        exec.interrupt_tx(),
        token.clone(),
    )?;
    guard.register(connection.id);
    state.stats.increment_total_connections();

    if parsed.claims.kind != DatabaseKind::Server {
        let database = parsed.claims.database.clone();
        let mut slot = connection.acquire().await;
        state.storage.open_database(&database).await?;
        slot.database = Some(DatabaseSession::new(
            database,
            state.storage.clone(),
            state.query_engine.clone(),
        ));
    }
    info!(
        "{}: reopened session on new connection {}",
        exec.addr(),
        connection.id
    );

    Ok(Response::DatabaseOpened {
        connection_id: connection.id,
        token: token.to_vec(),
    })
}

/// Unbinds the database session and retires the connection. The channel
/// itself stays up; other connections may still be multiplexed over it.
pub async fn close_database(
    exec: &RequestExecutor,
    connection: &Arc<ServerConnection>,
    slot: &mut SessionSlot,
) -> Result<Response, ZirconDBError> {
    slot.database.take();
    exec.state().disconnect_connection(connection.id);
    Ok(Response::Ok)
}

pub fn config_get(exec: &RequestExecutor, key: &str) -> Result<Response, ZirconDBError> {
    Ok(Response::ConfigValue {
        value: exec.state().settings.get(key)?,
    })
}

pub fn config_set(
    exec: &RequestExecutor,
    key: &str,
    value: &str,
) -> Result<Response, ZirconDBError> {
    exec.state().settings.set(key, value)?;
    Ok(Response::Ok)
}

pub fn config_list(exec: &RequestExecutor) -> Result<Response, ZirconDBError> {
    Ok(Response::ConfigEntries {
        entries: exec.state().settings.list(),
    })
}

/// Shuts the whole server down. Requires re-authentication with admin
/// credentials over the same channel; the broadcast stops every task.
pub async fn shutdown(
    exec: &RequestExecutor,
    username: &str,
    password: &str,
) -> Result<Response, ZirconDBError> {
    let state = exec.state();
    let user = state.users.verify_admin(username, password).await?;
    info!(
        "Shutdown requested by '{}' from {}; stopping server.",
        user.username,
        exec.addr()
    );
    let _ = state.shutdown_tx.send(());
    Ok(Response::ShuttingDown)
}
