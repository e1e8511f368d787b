// src/core/dispatch/query_ops.rs

//! Query execution and cursor paging.

use super::RequestExecutor;
use crate::core::ZirconDBError;
use crate::core::database::{CursorPage, DatabaseSession};
use crate::core::protocol::{QueryKind, Response};

fn effective_page_size(exec: &RequestExecutor, page_size: u32) -> Result<usize, ZirconDBError> {
    if page_size == 0 {
        return Err(ZirconDBError::InvalidState(
            "page size must be positive".to_string(),
        ));
    }
    let max = exec.state().settings.get_usize("query.max_page_size");
    Ok((page_size as usize).min(max))
}

fn page_response(page: CursorPage) -> Response {
    Response::QueryResult {
        query_id: page.query_id,
        rows: page.rows,
        has_more: page.has_more,
    }
}

pub async fn execute(
    exec: &RequestExecutor,
    session: &mut DatabaseSession,
    kind: QueryKind,
    statement: &str,
    page_size: u32,
) -> Result<Response, ZirconDBError> {
    let page_size = effective_page_size(exec, page_size)?;
    let page = session.execute_query(kind, statement, page_size).await?;
    Ok(page_response(page))
}

pub fn next_page(
    exec: &RequestExecutor,
    session: &mut DatabaseSession,
    query_id: u64,
    page_size: u32,
) -> Result<Response, ZirconDBError> {
    let page_size = effective_page_size(exec, page_size)?;
    let page = session.query_next_page(query_id, page_size)?;
    Ok(page_response(page))
}

pub fn close(session: &mut DatabaseSession, query_id: u64) -> Result<Response, ZirconDBError> {
    session.close_query(query_id);
    Ok(Response::Ok)
}
