// src/core/dispatch/record_ops.rs

//! Single-record CRUD with optimistic version checks.

use crate::core::ZirconDBError;
use crate::core::database::DatabaseSession;
use crate::core::protocol::Response;
use bytes::Bytes;

pub async fn create(
    session: &mut DatabaseSession,
    payload: Vec<u8>,
) -> Result<Response, ZirconDBError> {
    let record = session.create_record(Bytes::from(payload)).await?;
    Ok(Response::RecordCreated {
        record_id: record.record_id,
        version: record.version,
    })
}

pub async fn read(
    session: &mut DatabaseSession,
    record_id: i64,
) -> Result<Response, ZirconDBError> {
    let record = session.read_record(record_id).await?;
    Ok(Response::Record {
        record_id: record.record_id,
        version: record.version,
        payload: record.payload.to_vec(),
    })
}

pub async fn update(
    session: &mut DatabaseSession,
    record_id: i64,
    payload: Vec<u8>,
    expected_version: u64,
) -> Result<Response, ZirconDBError> {
    let version = session
        .update_record(record_id, Bytes::from(payload), expected_version)
        .await?;
    Ok(Response::RecordUpdated { version })
}

pub async fn delete(
    session: &mut DatabaseSession,
    record_id: i64,
    expected_version: Option<u64>,
) -> Result<Response, ZirconDBError> {
    session.delete_record(record_id, expected_version).await?;
    Ok(Response::Ok)
}

pub async fn exists(
    session: &mut DatabaseSession,
    record_id: i64,
) -> Result<Response, ZirconDBError> {
    let exists = session.record_exists(record_id).await?;
    Ok(Response::Exists { exists })
}
