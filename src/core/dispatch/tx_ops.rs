// src/core/dispatch/tx_ops.rs

//! The transaction protocol: begin, streamed merges, commit, rollback and
//! client resynchronization via fetch.

use super::RequestExecutor;
use crate::core::ZirconDBError;
use crate::core::database::DatabaseSession;
use crate::core::protocol::{RecordOperationRequest, Response};

/// Rejects a single merge batch larger than the configured ceiling before
/// it ever reaches the transaction buffers.
fn check_batch_size(
    exec: &RequestExecutor,
    operations: &[RecordOperationRequest],
) -> Result<(), ZirconDBError> {
    let max = exec.state().settings.get_usize("tx.max_operations");
    if operations.len() > max {
        return Err(ZirconDBError::InvalidState(format!(
            "transaction batch of {} operations exceeds the limit of {max}",
            operations.len()
        )));
    }
    Ok(())
}

pub fn begin(
    exec: &RequestExecutor,
    session: &mut DatabaseSession,
    tx_id: i64,
    operations: Vec<RecordOperationRequest>,
) -> Result<Response, ZirconDBError> {
    check_batch_size(exec, &operations)?;
    session.begin_transaction(tx_id, operations)?;
    Ok(Response::TxState {
        tx_id,
        id_map: Vec::new(),
    })
}

pub fn send_state(
    exec: &RequestExecutor,
    session: &mut DatabaseSession,
    tx_id: i64,
    operations: Vec<RecordOperationRequest>,
) -> Result<Response, ZirconDBError> {
    check_batch_size(exec, &operations)?;
    session.merge_transaction_state(tx_id, operations)?;
    Ok(Response::TxState {
        tx_id,
        id_map: Vec::new(),
    })
}

pub async fn commit(
    exec: &RequestExecutor,
    session: &mut DatabaseSession,
    tx_id: i64,
    operations: Vec<RecordOperationRequest>,
) -> Result<Response, ZirconDBError> {
    check_batch_size(exec, &operations)?;
    let id_map = session.commit_transaction(tx_id, operations).await?;
    exec.state().stats.increment_total_commits();
    Ok(Response::Committed {
        tx_id,
        id_map: id_map.into_iter().collect(),
    })
}

pub fn rollback(session: &mut DatabaseSession) -> Result<Response, ZirconDBError> {
    session.rollback_transaction();
    Ok(Response::Ok)
}

pub fn fetch(session: &mut DatabaseSession, tx_id: i64) -> Result<Response, ZirconDBError> {
    let (operations, id_map) = session.fetch_transaction(tx_id)?;
    Ok(Response::TxContents {
        tx_id,
        operations,
        id_map,
    })
}
