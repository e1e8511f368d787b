// src/core/query/mod.rs

//! The narrow interface to the query/command execution engine.
//!
//! Parsing and planning are external concerns; the front end only needs a
//! lazy, finite, non-restartable row sequence per executed statement. The
//! bundled `ScanQueryEngine` understands just enough to exercise the cursor
//! machinery against the in-memory storage engine.

use crate::core::ZirconDBError;
use crate::core::protocol::{QueryKind, ResultRow};
use crate::core::storage::StorageEngine;
use async_trait::async_trait;
use std::sync::Arc;

/// The query engine contract consumed by the front end.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Executes a statement against a database and returns its result
    /// sequence. The sequence is consumed page by page and cannot restart.
    async fn execute(
        &self,
        database: &str,
        kind: QueryKind,
        statement: &str,
    ) -> Result<Box<dyn Iterator<Item = ResultRow> + Send + Sync>, ZirconDBError>;
}

/// A minimal engine over the storage scan. Supported statements:
///
/// * `scan` — every record of the database, in id order.
/// * `scan limit <n>` — the first `n` records.
pub struct ScanQueryEngine {
    storage: Arc<dyn StorageEngine>,
}

impl ScanQueryEngine {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl QueryEngine for ScanQueryEngine {
    async fn execute(
        &self,
        database: &str,
        _kind: QueryKind,
        statement: &str,
    ) -> Result<Box<dyn Iterator<Item = ResultRow> + Send + Sync>, ZirconDBError> {
        let mut parts = statement.split_whitespace();
        match parts.next() {
            Some("scan") => {
                let limit = match (parts.next(), parts.next()) {
                    (None, _) => usize::MAX,
                    (Some("limit"), Some(n)) => n.parse().map_err(|_| {
                        ZirconDBError::InvalidState(format!("invalid scan limit '{n}'"))
                    })?,
                    _ => {
                        return Err(ZirconDBError::InvalidState(format!(
                            "unsupported statement '{statement}'"
                        )));
                    }
                };
                let records = self.storage.scan(database).await?;
                Ok(Box::new(records.into_iter().take(limit).map(|r| {
                    ResultRow {
                        record_id: r.record_id,
                        payload: r.payload.to_vec(),
                    }
                })))
            }
            _ => Err(ZirconDBError::InvalidState(format!(
                "unsupported statement '{statement}'"
            ))),
        }
    }
}
