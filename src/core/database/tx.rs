// src/core/database/tx.rs

//! The server side of an optimistic, multi-message transaction.
//!
//! A client streams record operations across one or more requests; the
//! server buffers them here, then applies everything at commit in the exact
//! order received. Client-minted temporary ids (negative) become permanent
//! ids as the commit first realizes them, and the resulting mapping is
//! handed back so the client can fix up its own references.

use crate::core::ZirconDBError;
use crate::core::protocol::{RecordOperationKind, RecordOperationRequest};
use crate::core::storage::{self, RecordId, StorageEngine, StoredRecord};
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// One buffered create/update/delete instruction.
#[derive(Debug, Clone)]
pub struct RecordOperation {
    pub kind: RecordOperationKind,
    pub record_id: RecordId,
    pub payload: Bytes,
    pub expected_version: Option<u64>,
}

impl From<RecordOperationRequest> for RecordOperation {
    fn from(req: RecordOperationRequest) -> Self {
        Self {
            kind: req.kind,
            record_id: req.record_id,
            payload: Bytes::from(req.payload),
            expected_version: req.expected_version,
        }
    }
}

impl From<&RecordOperation> for RecordOperationRequest {
    fn from(op: &RecordOperation) -> Self {
        Self {
            kind: op.kind,
            record_id: op.record_id,
            payload: op.payload.to_vec(),
            expected_version: op.expected_version,
        }
    }
}

/// Transaction lifecycle. Committed and rolled back are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Active,
    Committed,
    RolledBack,
}

/// Undo journal entry recorded per applied operation so a failing commit can
/// put storage back exactly as it was.
enum UndoOp {
    RemoveCreated(RecordId),
    Restore(StoredRecord),
}

/// A transaction owned by exactly one database session.
#[derive(Debug)]
pub struct ServerTransaction {
    id: i64,
    phase: TxPhase,
    operations: Vec<RecordOperation>,
    /// Temporary ids minted by creates merged so far; references to any
    /// other temporary id are unresolved and rejected.
    seen_temporaries: HashSet<RecordId>,
    /// temp → permanent mapping, filled at commit in realization order.
    id_map: IndexMap<RecordId, RecordId>,
}

impl ServerTransaction {
    /// Starts a transaction with the client-chosen identifier.
    pub fn begin(id: i64) -> Self {
        Self {
            id,
            phase: TxPhase::Active,
            operations: Vec::new(),
            seen_temporaries: HashSet::new(),
            id_map: IndexMap::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == TxPhase::Active
    }

    pub fn operations(&self) -> &[RecordOperation] {
        &self.operations
    }

    pub fn id_map(&self) -> &IndexMap<RecordId, RecordId> {
        &self.id_map
    }

    /// Appends received operations in input order. May be called any number
    /// of times before commit; large transactions stream across several
    /// request/response pairs instead of one giant message.
    ///
    /// An update or delete that references a temporary id no earlier create
    /// minted is an unresolved reference and fails the merge.
    pub fn merge_received(
        &mut self,
        operations: Vec<RecordOperation>,
    ) -> Result<(), ZirconDBError> {
        for operation in operations {
            match operation.kind {
                RecordOperationKind::Create => {
                    if !storage::is_temporary(operation.record_id) {
                        return Err(ZirconDBError::InvalidState(format!(
                            "create must use a temporary id, got {}",
                            operation.record_id
                        )));
                    }
                    self.seen_temporaries.insert(operation.record_id);
                }
                RecordOperationKind::Update | RecordOperationKind::Delete => {
                    if storage::is_temporary(operation.record_id)
                        && !self.seen_temporaries.contains(&operation.record_id)
                    {
                        return Err(ZirconDBError::UnresolvedTemporaryId(operation.record_id));
                    }
                }
            }
            self.operations.push(operation);
        }
        Ok(())
    }

    /// Applies every pending operation in submission order, minting
    /// permanent ids for temporary ones as they are first realized.
    ///
    /// Any failure rolls the whole transaction back — every already-applied
    /// operation is undone in reverse order — before the error propagates,
    /// so a partial commit is never observable. A cluster-offline failure is
    /// re-raised as such, never masked as a generic not-found.
    pub async fn commit(
        &mut self,
        storage: &Arc<dyn StorageEngine>,
        database: &str,
    ) -> Result<IndexMap<RecordId, RecordId>, ZirconDBError> {
        debug_assert!(self.is_active());
        let mut undo_log: Vec<UndoOp> = Vec::with_capacity(self.operations.len());

        let operations = std::mem::take(&mut self.operations);
        for operation in &operations {
            if let Err(e) = self.apply(storage, database, operation, &mut undo_log).await {
                self.undo(storage, database, undo_log).await;
                self.id_map.clear();
                self.phase = TxPhase::RolledBack;
                return Err(e);
            }
        }

        self.phase = TxPhase::Committed;
        Ok(self.id_map.clone())
    }

    async fn apply(
        &mut self,
        storage: &Arc<dyn StorageEngine>,
        database: &str,
        operation: &RecordOperation,
        undo_log: &mut Vec<UndoOp>,
    ) -> Result<(), ZirconDBError> {
        let target = self.resolve(operation.record_id)?;
        match operation.kind {
            RecordOperationKind::Create => {
                let created = storage.create(database, operation.payload.clone()).await?;
                self.id_map.insert(operation.record_id, created.record_id);
                undo_log.push(UndoOp::RemoveCreated(created.record_id));
            }
            RecordOperationKind::Update => {
                let prior = storage
                    .update(
                        database,
                        target,
                        operation.payload.clone(),
                        operation.expected_version,
                    )
                    .await?;
                undo_log.push(UndoOp::Restore(prior));
            }
            RecordOperationKind::Delete => {
                let prior = storage
                    .delete(database, target, operation.expected_version)
                    .await?;
                undo_log.push(UndoOp::Restore(prior));
            }
        }
        Ok(())
    }

    /// Resolves a target id through the temp→permanent mapping. Creates are
    /// applied in submission order, so by the time an operation references a
    /// temporary id its permanent id is already minted.
    fn resolve(&self, record_id: RecordId) -> Result<RecordId, ZirconDBError> {
        if !storage::is_temporary(record_id) {
            return Ok(record_id);
        }
        match self.id_map.get(&record_id) {
            Some(real) => Ok(*real),
            // A create about to mint this id resolves to itself.
            None if self.seen_temporaries.contains(&record_id) => Ok(record_id),
            None => Err(ZirconDBError::UnresolvedTemporaryId(record_id)),
        }
    }

    async fn undo(&self, storage: &Arc<dyn StorageEngine>, database: &str, undo_log: Vec<UndoOp>) {
        for entry in undo_log.into_iter().rev() {
            let result = match entry {
                UndoOp::RemoveCreated(rid) => {
                    storage.delete(database, rid, None).await.map(|_| ())
                }
                UndoOp::Restore(record) => storage.restore(database, record).await,
            };
            if let Err(e) = result {
                warn!("Rollback of applied transaction operation failed: {e}");
            }
        }
    }

    /// Discards all pending operations and the id mapping. Merge buffers
    /// operations without taking storage-level locks, so there is nothing
    /// else to release.
    pub fn rollback(&mut self) {
        debug!("Transaction {} rolled back.", self.id);
        self.operations.clear();
        self.seen_temporaries.clear();
        self.id_map.clear();
        self.phase = TxPhase::RolledBack;
    }

    /// Returns the still-pending operations and id mapping without altering
    /// state; clients resynchronizing after a dropped response call this.
    pub fn fetch(&self) -> (Vec<RecordOperationRequest>, Vec<(RecordId, RecordId)>) {
        (
            self.operations.iter().map(Into::into).collect(),
            self.id_map.iter().map(|(t, p)| (*t, *p)).collect(),
        )
    }
}
