// src/core/database/mod.rs

//! The database session bound to a connection.
//!
//! A `DatabaseSession` is only ever reached through its connection's request
//! lock, so one in-flight request at a time owns it by construction. It
//! carries the session's single optional transaction and its open query
//! cursors.

mod cursors;
mod tx;

pub use cursors::{CursorPage, CursorRegistry, QueryCursor};
pub use tx::{RecordOperation, ServerTransaction, TxPhase};

use crate::core::ZirconDBError;
use crate::core::metrics;
use crate::core::protocol::{QueryKind, RecordOperationRequest};
use crate::core::query::QueryEngine;
use crate::core::storage::{RecordId, StorageEngine, StoredRecord};
use bytes::Bytes;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

pub struct DatabaseSession {
    name: String,
    storage: Arc<dyn StorageEngine>,
    query_engine: Arc<dyn QueryEngine>,
    transaction: Option<ServerTransaction>,
    cursors: CursorRegistry,
}

impl DatabaseSession {
    pub fn new(
        name: String,
        storage: Arc<dyn StorageEngine>,
        query_engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            name,
            storage,
            query_engine,
            transaction: None,
            cursors: CursorRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_active_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(|t| t.is_active())
    }

    pub fn open_cursor_count(&self) -> usize {
        self.cursors.len()
    }

    // --- Single-record CRUD ---

    pub async fn create_record(&self, payload: Bytes) -> Result<StoredRecord, ZirconDBError> {
        self.storage.create(&self.name, payload).await
    }

    pub async fn read_record(&self, rid: RecordId) -> Result<StoredRecord, ZirconDBError> {
        self.storage.read(&self.name, rid).await
    }

    pub async fn update_record(
        &self,
        rid: RecordId,
        payload: Bytes,
        expected_version: u64,
    ) -> Result<u64, ZirconDBError> {
        let prior = self
            .storage
            .update(&self.name, rid, payload, Some(expected_version))
            .await?;
        Ok(prior.version + 1)
    }

    pub async fn delete_record(
        &self,
        rid: RecordId,
        expected_version: Option<u64>,
    ) -> Result<(), ZirconDBError> {
        self.storage
            .delete(&self.name, rid, expected_version)
            .await?;
        Ok(())
    }

    pub async fn record_exists(&self, rid: RecordId) -> Result<bool, ZirconDBError> {
        self.storage.exists(&self.name, rid).await
    }

    // --- Transaction protocol ---

    /// Begin, or idempotently continue, the session's transaction.
    ///
    /// With no active transaction the supplied id starts one and the
    /// operations merge immediately. A begin carrying the already-active id
    /// is treated as a continuation and merges. A different id is a
    /// protocol error.
    pub fn begin_transaction(
        &mut self,
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    ) -> Result<(), ZirconDBError> {
        match &self.transaction {
            Some(tx) if tx.is_active() => {
                if tx.id() != tx_id {
                    let expected = tx.id();
                    // A protocol error discards the partially-merged
                    // transaction so no half-applied state persists.
                    self.rollback_transaction();
                    return Err(ZirconDBError::InvalidTransactionId {
                        expected,
                        received: tx_id,
                    });
                }
            }
            _ => {
                debug!("Session '{}': beginning transaction {}.", self.name, tx_id);
                self.transaction = Some(ServerTransaction::begin(tx_id));
                metrics::ACTIVE_TRANSACTIONS.inc();
            }
        }
        self.merge_into_active(operations)
    }

    /// Appends another batch of operations to the active transaction.
    pub fn merge_transaction_state(
        &mut self,
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    ) -> Result<(), ZirconDBError> {
        self.check_active_id(tx_id)?;
        self.merge_into_active(operations)
    }

    /// Commits the transaction with the given id, implicitly beginning one
    /// when the server never saw an explicit begin (short transactions fold
    /// into a single round trip). Returns the temp → permanent id mapping.
    pub async fn commit_transaction(
        &mut self,
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    ) -> Result<IndexMap<RecordId, RecordId>, ZirconDBError> {
        if !self.has_active_transaction() {
            self.begin_transaction(tx_id, operations)?;
        } else {
            self.check_active_id(tx_id)?;
            self.merge_into_active(operations)?;
        }

        let storage = self.storage.clone();
        let name = self.name.clone();
        let Some(tx) = self.transaction.as_mut() else {
            return Err(ZirconDBError::Internal(
                "transaction state lost between begin and commit".to_string(),
            ));
        };
        let result = tx.commit(&storage, &name).await;
        metrics::ACTIVE_TRANSACTIONS.dec();
        match result {
            Ok(id_map) => {
                debug!("Session '{}': committed transaction {}.", name, tx_id);
                self.transaction = None;
                Ok(id_map)
            }
            Err(e) => {
                // The transaction rolled itself back; drop the terminal husk.
                self.transaction = None;
                Err(e)
            }
        }
    }

    /// Discards the active transaction. A rollback with none active is not
    /// an error; the client may be re-sending after a dropped response.
    pub fn rollback_transaction(&mut self) {
        if let Some(mut tx) = self.transaction.take()
            && tx.is_active()
        {
            tx.rollback();
            metrics::ACTIVE_TRANSACTIONS.dec();
        }
    }

    /// Returns the pending operations and id mapping of the active
    /// transaction without altering it.
    pub fn fetch_transaction(
        &self,
        tx_id: i64,
    ) -> Result<(Vec<RecordOperationRequest>, Vec<(RecordId, RecordId)>), ZirconDBError> {
        let tx = self
            .transaction
            .as_ref()
            .filter(|t| t.is_active())
            .ok_or(ZirconDBError::NoActiveTransaction)?;
        if tx.id() != tx_id {
            return Err(ZirconDBError::InvalidTransactionId {
                expected: tx.id(),
                received: tx_id,
            });
        }
        Ok(tx.fetch())
    }

    /// Validates the id carried by a merge/commit call against the active
    /// transaction. A mismatch is a protocol error: the partially-merged
    /// transaction is discarded before the error returns.
    fn check_active_id(&mut self, tx_id: i64) -> Result<(), ZirconDBError> {
        let expected = {
            let tx = self
                .transaction
                .as_ref()
                .filter(|t| t.is_active())
                .ok_or(ZirconDBError::NoActiveTransaction)?;
            tx.id()
        };
        if expected != tx_id {
            self.rollback_transaction();
            return Err(ZirconDBError::InvalidTransactionId {
                expected,
                received: tx_id,
            });
        }
        Ok(())
    }

    /// Merges into the active transaction; a failed merge rolls the whole
    /// transaction back so no half-merged state persists.
    fn merge_into_active(
        &mut self,
        operations: Vec<RecordOperationRequest>,
    ) -> Result<(), ZirconDBError> {
        let tx = self
            .transaction
            .as_mut()
            .filter(|t| t.is_active())
            .ok_or(ZirconDBError::NoActiveTransaction)?;
        let converted = operations.into_iter().map(Into::into).collect();
        if let Err(e) = tx.merge_received(converted) {
            tx.rollback();
            metrics::ACTIVE_TRANSACTIONS.dec();
            self.transaction = None;
            return Err(e);
        }
        Ok(())
    }

    // --- Query cursors ---

    /// Executes a statement and serves the first page, registering a cursor
    /// when more rows remain.
    pub async fn execute_query(
        &mut self,
        kind: QueryKind,
        statement: &str,
        page_size: usize,
    ) -> Result<CursorPage, ZirconDBError> {
        let rows = self
            .query_engine
            .execute(&self.name, kind, statement)
            .await?;
        let page = self.cursors.open(rows, page_size);
        metrics::OPEN_CURSORS.set(self.cursors.len() as i64);
        Ok(page)
    }

    pub fn query_next_page(
        &mut self,
        query_id: u64,
        page_size: usize,
    ) -> Result<CursorPage, ZirconDBError> {
        let page = self.cursors.page(query_id, page_size)?;
        metrics::OPEN_CURSORS.set(self.cursors.len() as i64);
        Ok(page)
    }

    pub fn close_query(&mut self, query_id: u64) {
        self.cursors.close(query_id);
        metrics::OPEN_CURSORS.set(self.cursors.len() as i64);
    }
}

impl Drop for DatabaseSession {
    /// Cursors left open when their owning session closes are closed
    /// implicitly; a lingering active transaction is discarded.
    fn drop(&mut self) {
        self.cursors.close_all();
        if let Some(tx) = &self.transaction
            && tx.is_active()
        {
            metrics::ACTIVE_TRANSACTIONS.dec();
        }
    }
}
