// src/core/dispatch/push_ops.rs

//! Push channel subscribe/unsubscribe, including live queries.

use super::RequestExecutor;
use crate::core::ZirconDBError;
use crate::core::database::DatabaseSession;
use crate::core::protocol::Response;
use crate::core::push::PushKind;
use crate::core::registry::ServerConnection;
use std::sync::Arc;

pub fn subscribe(
    exec: &RequestExecutor,
    connection: &Arc<ServerConnection>,
    session: &mut DatabaseSession,
    kind: PushKind,
) -> Result<Response, ZirconDBError> {
    exec.state()
        .push
        .subscribe(session.name(), kind, connection.id);
    Ok(Response::Subscribed)
}

pub fn unsubscribe(
    exec: &RequestExecutor,
    connection: &Arc<ServerConnection>,
    session: &mut DatabaseSession,
    kind: PushKind,
) -> Result<Response, ZirconDBError> {
    exec.state()
        .push
        .unsubscribe(session.name(), kind, connection.id);
    Ok(Response::Unsubscribed)
}

pub fn subscribe_live(
    exec: &RequestExecutor,
    connection: &Arc<ServerConnection>,
    session: &mut DatabaseSession,
    statement: &str,
) -> Result<Response, ZirconDBError> {
    let monitor_id =
        exec.state()
            .live_queries
            .subscribe(connection.id, session.name(), statement);
    Ok(Response::LiveSubscribed { monitor_id })
}

pub fn unsubscribe_live(
    exec: &RequestExecutor,
    monitor_id: &str,
) -> Result<Response, ZirconDBError> {
    exec.state().live_queries.unsubscribe(monitor_id);
    Ok(Response::Unsubscribed)
}
