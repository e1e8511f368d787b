// src/core/database/cursors.rs

//! Open query cursors, paged across request/response round trips.

use crate::core::ZirconDBError;
use crate::core::protocol::ResultRow;
use std::collections::HashMap;

/// A lazy, finite, non-restartable sequence of result rows.
pub struct QueryCursor {
    pub query_id: u64,
    rows: Box<dyn Iterator<Item = ResultRow> + Send + Sync>,
    exhausted: bool,
}

impl QueryCursor {
    /// Pulls up to `max_rows` more elements, flagging exhaustion when the
    /// underlying sequence ends.
    fn pull(&mut self, max_rows: usize) -> Vec<ResultRow> {
        let mut page = Vec::with_capacity(max_rows.min(64));
        while page.len() < max_rows {
            match self.rows.next() {
                Some(row) => page.push(row),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        page
    }
}

impl std::fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCursor")
            .field("query_id", &self.query_id)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// One page of results plus the continuation flag.
#[derive(Debug)]
pub struct CursorPage {
    pub query_id: u64,
    pub rows: Vec<ResultRow>,
    pub has_more: bool,
}

/// Holds the partially-consumed result iterators of one database session,
/// keyed by a query id unique within that session.
#[derive(Debug, Default)]
pub struct CursorRegistry {
    next_query_id: u64,
    cursors: HashMap<u64, QueryCursor>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a fresh result sequence and serves its first page. A
    /// sequence exhausted by that first page is never registered; there is
    /// nothing left to come back for.
    pub fn open(
        &mut self,
        rows: Box<dyn Iterator<Item = ResultRow> + Send + Sync>,
        first_page_size: usize,
    ) -> CursorPage {
        self.next_query_id += 1;
        let query_id = self.next_query_id;
        let mut cursor = QueryCursor {
            query_id,
            rows,
            exhausted: false,
        };
        let page = cursor.pull(first_page_size);
        let has_more = !cursor.exhausted;
        if has_more {
            self.cursors.insert(query_id, cursor);
        }
        CursorPage {
            query_id,
            rows: page,
            has_more,
        }
    }

    /// Pulls the next page. An unknown id is an error; a cursor that was
    /// already exhausted answers one final empty page with `has_more=false`
    /// and is released by that acknowledgement.
    pub fn page(&mut self, query_id: u64, max_rows: usize) -> Result<CursorPage, ZirconDBError> {
        let cursor = self
            .cursors
            .get_mut(&query_id)
            .ok_or(ZirconDBError::UnknownQueryId(query_id))?;
        if cursor.exhausted {
            self.cursors.remove(&query_id);
            return Ok(CursorPage {
                query_id,
                rows: Vec::new(),
                has_more: false,
            });
        }
        let rows = cursor.pull(max_rows);
        let has_more = !cursor.exhausted;
        Ok(CursorPage {
            query_id,
            rows,
            has_more,
        })
    }

    /// Releases a cursor immediately. Idempotent.
    pub fn close(&mut self, query_id: u64) {
        self.cursors.remove(&query_id);
    }

    /// Drops every open cursor; called when the owning session ends.
    pub fn close_all(&mut self) {
        self.cursors.clear();
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
