// src/core/dispatch/mod.rs

//! Request dispatch: resolves a request envelope to a connection, acquires
//! that connection's lock, and routes into the operation family.
//!
//! Every path through [`RequestExecutor::execute`] holds the connection lock
//! for exactly one request and releases it on every exit, errors included —
//! the guard is the ownership token for the bound database session.

mod push_ops;
mod query_ops;
mod record_ops;
mod server_ops;
mod tx_ops;

use crate::connection::ConnectionGuard;
use crate::core::ZirconDBError;
use crate::core::auth::TokenHash;
use crate::core::metrics;
use crate::core::protocol::{
    Request, RequestEnvelope, RequestFlags, Response, ServerMessage,
};
use crate::core::registry::ServerConnection;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// What the connection handler should do after a request.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Send the reply and keep serving the channel.
    Reply(Response),
    /// Send the reply, then close the channel: a security failure tore the
    /// connection down.
    ReplyAndClose(Response),
}

/// Executes requests arriving on one network channel.
pub struct RequestExecutor {
    state: Arc<ServerState>,
    addr: SocketAddr,
    push_tx: mpsc::Sender<ServerMessage>,
    interrupt_tx: broadcast::Sender<()>,
}

impl RequestExecutor {
    pub fn new(
        state: Arc<ServerState>,
        addr: SocketAddr,
        push_tx: mpsc::Sender<ServerMessage>,
        interrupt_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            state,
            addr,
            push_tx,
            interrupt_tx,
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Processes one request envelope end to end.
    pub async fn execute(
        &self,
        envelope: RequestEnvelope,
        guard: &mut ConnectionGuard,
    ) -> ExecutionOutcome {
        let name = envelope.request.name();
        let flags = envelope.request.flags();
        let connection_id = envelope.connection_id;
        self.state.stats.increment_total_requests();
        metrics::REQUESTS_PROCESSED_TOTAL.inc();
        debug!("{}: dispatching '{}'", self.addr, name);

        let result = if flags.contains(RequestFlags::NO_CONNECTION) {
            self.execute_handshake(envelope, guard).await
        } else {
            self.execute_on_connection(envelope, name, flags).await
        };

        match result {
            Ok(response) => ExecutionOutcome::Reply(response),
            Err(e) if e.is_security() => {
                warn!("{}: security failure on '{}': {}", self.addr, name, e);
                metrics::SECURITY_DISCONNECTS_TOTAL.inc();
                if let Some(id) = connection_id {
                    self.state.force_disconnect(id);
                }
                ExecutionOutcome::ReplyAndClose(e.into())
            }
            Err(e) => {
                debug!("{}: request '{}' failed: {}", self.addr, name, e);
                ExecutionOutcome::Reply(e.into())
            }
        }
    }

    /// Handshake-family requests create or re-attach connections and may
    /// legally arrive without a connection id.
    async fn execute_handshake(
        &self,
        envelope: RequestEnvelope,
        guard: &mut ConnectionGuard,
    ) -> Result<Response, ZirconDBError> {
        match envelope.request {
            Request::Connect { username, password } => {
                server_ops::connect(self, guard, &username, &password).await
            }
            Request::OpenDatabase {
                database,
                username,
                password,
            } => {
                server_ops::open_database(
                    self,
                    guard,
                    envelope.connection_id,
                    &database,
                    &username,
                    &password,
                )
                .await
            }
            Request::Reopen => {
                let token = envelope.token.ok_or_else(|| {
                    ZirconDBError::TokenInvalid("reopen requires a session token".to_string())
                })?;
                server_ops::reopen(self, guard, token).await
            }
            _ => Err(ZirconDBError::Internal(
                "request routed to handshake path without the handshake flag".to_string(),
            )),
        }
    }

    /// Everything else: resolve the connection, check the token, take the
    /// lock, route.
    async fn execute_on_connection(
        &self,
        envelope: RequestEnvelope,
        name: &'static str,
        flags: RequestFlags,
    ) -> Result<Response, ZirconDBError> {
        let id = envelope.connection_id.ok_or_else(|| {
            ZirconDBError::InvalidState(format!("request '{name}' requires a connection id"))
        })?;
        let connection = self
            .state
            .registry
            .lookup(id)
            .ok_or(ZirconDBError::UnknownConnection(id))?;

        self.check_token(&connection, envelope.token.as_deref())?;

        let mut slot = connection.acquire().await;
        connection.record_request(name, flags);

        if flags.contains(RequestFlags::REQUIRES_DATABASE) && slot.database.is_none() {
            return Err(ZirconDBError::DatabaseNotOpen);
        }

        self.route(&connection, &mut slot, envelope.request).await
    }

    /// Token-based connections present their token on every request; a
    /// missing, foreign, tampered or expired token is a security failure.
    fn check_token(
        &self,
        connection: &Arc<ServerConnection>,
        token: Option<&[u8]>,
    ) -> Result<(), ZirconDBError> {
        if !connection.is_token_based() {
            return Ok(());
        }
        let token = token.ok_or_else(|| {
            ZirconDBError::TokenInvalid("request is missing the session token".to_string())
        })?;
        let bound = connection.token_state().ok_or_else(|| {
            ZirconDBError::Internal("token-based connection lost its token state".to_string())
        })?;
        if TokenHash::of(token) != bound.hash {
            return Err(ZirconDBError::TokenInvalid(
                "token does not belong to this connection's session".to_string(),
            ));
        }
        self.state.token_handler.parse_and_validate(token)?;
        Ok(())
    }

    async fn route(
        &self,
        connection: &Arc<ServerConnection>,
        slot: &mut crate::core::registry::SessionSlot,
        request: Request,
    ) -> Result<Response, ZirconDBError> {
        match request {
            Request::CloseDatabase => server_ops::close_database(self, connection, slot).await,
            Request::ConfigGet { key } => server_ops::config_get(self, &key),
            Request::ConfigSet { key, value } => server_ops::config_set(self, &key, &value),
            Request::ConfigList => server_ops::config_list(self),
            Request::Shutdown { username, password } => {
                server_ops::shutdown(self, &username, &password).await
            }

            Request::RecordCreate { payload } => {
                record_ops::create(session(slot)?, payload).await
            }
            Request::RecordRead { record_id } => {
                record_ops::read(session(slot)?, record_id).await
            }
            Request::RecordUpdate {
                record_id,
                payload,
                expected_version,
            } => record_ops::update(session(slot)?, record_id, payload, expected_version).await,
            Request::RecordDelete {
                record_id,
                expected_version,
            } => record_ops::delete(session(slot)?, record_id, expected_version).await,
            Request::RecordExists { record_id } => {
                record_ops::exists(session(slot)?, record_id).await
            }

            Request::TxBegin { tx_id, operations } => {
                tx_ops::begin(self, session(slot)?, tx_id, operations)
            }
            Request::TxSendState { tx_id, operations } => {
                tx_ops::send_state(self, session(slot)?, tx_id, operations)
            }
            Request::TxCommit { tx_id, operations } => {
                tx_ops::commit(self, session(slot)?, tx_id, operations).await
            }
            Request::TxRollback => tx_ops::rollback(session(slot)?),
            Request::TxFetch { tx_id } => tx_ops::fetch(session(slot)?, tx_id),

            Request::Query {
                kind,
                statement,
                page_size,
            } => query_ops::execute(self, session(slot)?, kind, &statement, page_size).await,
            Request::QueryNextPage {
                query_id,
                page_size,
            } => query_ops::next_page(self, session(slot)?, query_id, page_size),
            Request::QueryClose { query_id } => query_ops::close(session(slot)?, query_id),

            Request::Subscribe { kind } => {
                push_ops::subscribe(self, connection, session(slot)?, kind)
            }
            Request::Unsubscribe { kind } => {
                push_ops::unsubscribe(self, connection, session(slot)?, kind)
            }
            Request::SubscribeLiveQuery { statement } => {
                push_ops::subscribe_live(self, connection, session(slot)?, &statement)
            }
            Request::UnsubscribeLiveQuery { monitor_id } => {
                push_ops::unsubscribe_live(self, &monitor_id)
            }

            Request::Connect { .. } | Request::OpenDatabase { .. } | Request::Reopen => {
                Err(ZirconDBError::Internal(
                    "handshake request routed to the connection path".to_string(),
                ))
            }
        }
    }

    pub(crate) fn push_tx(&self) -> mpsc::Sender<ServerMessage> {
        self.push_tx.clone()
    }

    pub(crate) fn interrupt_tx(&self) -> broadcast::Sender<()> {
        self.interrupt_tx.clone()
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// The database session bound to the locked slot.
fn session(
    slot: &mut crate::core::registry::SessionSlot,
) -> Result<&mut crate::core::database::DatabaseSession, ZirconDBError> {
    slot.database.as_mut().ok_or(ZirconDBError::DatabaseNotOpen)
}
